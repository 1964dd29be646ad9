//! Audio container framing.
//!
//! `spec.md` §1 treats the audio-format encoders themselves as an external
//! collaborator ("out of scope... the audio-format encoders for container
//! framing (WAV/MP3/FLAC)"). WAV's container is simple enough (a 44-byte
//! fixed header) that this core frames it directly, matching the literal
//! header bytes `spec.md` §8 Scenario A requires; `pcm` is the fixed f32→i16
//! sample conversion with no container at all. `mp3`/`flac` are real
//! external encoders this corpus carries no crate for — see `DESIGN.md` for
//! why that's a deliberate non-fabrication rather than an oversight.

use crate::api::types::ResponseFormat;
use crate::audio::SAMPLE_RATE_HZ;
use crate::error::{Result, ServeError};

/// `Content-Type` header for a given response format.
#[must_use]
pub fn content_type(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Wav => "audio/wav",
        ResponseFormat::Mp3 => "audio/mpeg",
        ResponseFormat::Flac => "audio/flac",
        ResponseFormat::Pcm => "application/octet-stream",
    }
}

/// Build a 44-byte canonical RIFF/WAVE header for 16-bit mono PCM at
/// [`SAMPLE_RATE_HZ`].
///
/// `data_len_bytes` is the exact payload size for a single-payload
/// (`stream=false`) response. Streamed responses don't know their total
/// length up front, so the streaming path uses
/// [`streaming_header`] instead, which fills in a sentinel size.
#[must_use]
pub fn wav_header(data_len_bytes: u32) -> [u8; 44] {
    build_header(data_len_bytes)
}

/// A WAV header for the chunked-transfer streaming path, where the total
/// `data` size isn't known until the stream closes. Uses the
/// commonly-accepted streaming convention of `0xFFFFFFFF` (max u32) for
/// both the RIFF chunk size and the `data` subchunk size; most clients that
/// play back WAV over a live stream read until EOF rather than trusting
/// this field.
#[must_use]
pub fn streaming_header() -> [u8; 44] {
    build_header(u32::MAX - 36)
}

fn build_header(data_len_bytes: u32) -> [u8; 44] {
    const BITS_PER_SAMPLE: u16 = 16;
    const CHANNELS: u16 = 1;
    let byte_rate = SAMPLE_RATE_HZ * u32::from(CHANNELS) * u32::from(BITS_PER_SAMPLE / 8);
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_len_bytes.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len_bytes.to_le_bytes());
    header
}

/// Convert mono f32 PCM samples (range roughly `[-1.0, 1.0]`) to
/// little-endian 16-bit PCM bytes, clamping out-of-range samples.
#[must_use]
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let scaled = (clamped * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    out
}

/// `≈50ms` of silence, encoded as 16-bit PCM, used as the primer's
/// lead-in pad per §4.10 step 3.
#[must_use]
pub fn silence_pad_bytes() -> Vec<u8> {
    let samples = (SAMPLE_RATE_HZ as f64 * 0.05) as usize;
    vec![0u8; samples * 2]
}

/// Frame `samples` (f32 PCM) as the bytes appropriate for `format`.
///
/// # Errors
///
/// Returns [`ServeError::Config`] for `mp3`/`flac`: this core has no
/// bundled encoder for either (see module docs); an operator wiring in a
/// real encoder should replace this call site.
pub fn encode_samples(samples: &[f32], format: ResponseFormat) -> Result<Vec<u8>> {
    match format {
        ResponseFormat::Wav | ResponseFormat::Pcm => Ok(f32_to_pcm16_bytes(samples)),
        ResponseFormat::Mp3 | ResponseFormat::Flac => Err(ServeError::Config(format!(
            "{format:?} encoding requires an external encoder not vendored in this build"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_44_bytes_with_riff_wave_magic() {
        let header = wav_header(1000);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_encodes_sample_rate_and_bit_depth() {
        let header = wav_header(0);
        let sample_rate = u32::from_le_bytes(header[24..28].try_into().unwrap());
        let bits = u16::from_le_bytes(header[34..36].try_into().unwrap());
        let channels = u16::from_le_bytes(header[22..24].try_into().unwrap());
        assert_eq!(sample_rate, SAMPLE_RATE_HZ);
        assert_eq!(bits, 16);
        assert_eq!(channels, 1);
    }

    #[test]
    fn header_data_size_matches_payload() {
        let header = wav_header(2000);
        let data_size = u32::from_le_bytes(header[40..44].try_into().unwrap());
        assert_eq!(data_size, 2000);
    }

    #[test]
    fn silence_pad_is_roughly_50ms() {
        let pad = silence_pad_bytes();
        let samples = pad.len() / 2;
        let ms = samples as f64 / SAMPLE_RATE_HZ as f64 * 1000.0;
        assert!((ms - 50.0).abs() < 1.0);
        assert!(pad.iter().all(|&b| b == 0));
    }

    #[test]
    fn pcm_conversion_clamps_out_of_range() {
        let bytes = f32_to_pcm16_bytes(&[2.0, -2.0, 0.0]);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        let second = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(first, i16::MAX);
        assert_eq!(second, -i16::MAX);
    }

    #[test]
    fn encode_rejects_mp3_and_flac() {
        assert!(encode_samples(&[0.0], ResponseFormat::Mp3).is_err());
        assert!(encode_samples(&[0.0], ResponseFormat::Flac).is_err());
    }

    #[test]
    fn encode_accepts_wav_and_pcm() {
        assert!(encode_samples(&[0.1, 0.2], ResponseFormat::Wav).is_ok());
        assert!(encode_samples(&[0.1, 0.2], ResponseFormat::Pcm).is_ok());
    }

    #[test]
    fn content_types_match_formats() {
        assert_eq!(content_type(ResponseFormat::Wav), "audio/wav");
        assert_eq!(content_type(ResponseFormat::Mp3), "audio/mpeg");
        assert_eq!(content_type(ResponseFormat::Flac), "audio/flac");
        assert_eq!(content_type(ResponseFormat::Pcm), "application/octet-stream");
    }
}
