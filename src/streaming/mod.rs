//! Streaming Engine.
//!
//! Orchestrates the per-request pipeline: segment the request text,
//! resolve each segment through the Primer/Inference caches or the G2P
//! stage and Multi-Session Manager, and emit ordered audio chunks on an
//! `mpsc` channel — the same decoupling the teacher's SSE endpoint uses to
//! keep a long-lived pipeline's lifetime independent of the response
//! stream's lifetime, adapted here to binary audio frames instead of text
//! events.
//!
//! Container framing (WAV headers, `Content-Type`) is deliberately not
//! this module's job: [`AudioChunk`]s carry bare encoded sample bytes, and
//! the HTTP layer decides how to frame them for `stream=true` vs.
//! `stream=false` responses using [`container`].

pub mod container;

use crate::audio::SampleValidity;
use crate::cache::inference::InferenceCache;
use crate::cache::key::{inference_key, primer_key};
use crate::cache::primer::PrimerCache;
use crate::config::{SegmenterConfig, StreamingConfig};
use crate::error::{Result, ServeError};
use crate::g2p::{G2pStage, normalize};
use crate::observability::{Metrics, RequestTimeline, Stage};
use crate::api::types::ResponseFormat;
use crate::segmenter::{self, Segment};
use crate::session_manager::SessionManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A synthesis request as the Streaming Engine understands it, already
/// past request-body validation.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Correlates log lines and timeline events for this request.
    pub request_id: String,
    /// Normalized text to synthesize.
    pub text: String,
    /// Requested voice identifier.
    pub voice: String,
    /// Playback speed multiplier.
    pub speed: f32,
    /// Requested BCP-47-like language tag (not yet canonicalized).
    pub language: String,
    /// Requested output encoding.
    pub format: ResponseFormat,
}

/// One unit of the response body: encoded sample bytes for one segment, in
/// emission order.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded audio bytes for this chunk (container framing applied by the
    /// HTTP layer, not here).
    pub bytes: Vec<u8>,
    /// Which segment this chunk belongs to.
    pub segment_index: u32,
}

/// Orchestrates segmentation, caching, G2P, and inference routing for one
/// request at a time; cheap to clone (all fields are `Arc`-backed or
/// `Copy`/small `Clone` config structs), so one instance is shared across
/// all concurrent requests.
#[derive(Clone)]
pub struct StreamingEngine {
    session_manager: Arc<SessionManager>,
    g2p: Arc<G2pStage>,
    primer_cache: Arc<PrimerCache>,
    inference_cache: Arc<InferenceCache>,
    metrics: Arc<Metrics>,
    segmenter_config: SegmenterConfig,
    streaming_config: StreamingConfig,
}

impl StreamingEngine {
    /// Wire an engine from its collaborators.
    #[must_use]
    pub fn new(
        session_manager: Arc<SessionManager>,
        g2p: Arc<G2pStage>,
        primer_cache: Arc<PrimerCache>,
        inference_cache: Arc<InferenceCache>,
        metrics: Arc<Metrics>,
        segmenter_config: SegmenterConfig,
        streaming_config: StreamingConfig,
    ) -> Self {
        Self {
            session_manager,
            g2p,
            primer_cache,
            inference_cache,
            metrics,
            segmenter_config,
            streaming_config,
        }
    }

    /// Run `request` to completion, sending ordered [`AudioChunk`]s on
    /// `tx`.
    ///
    /// Per-segment failures are logged and skipped so the rest of the
    /// request still has a chance to play; this only returns `Err` if no
    /// segment produced any audio at all. A closed `tx` (client
    /// disconnect) ends the loop early and is not an error.
    ///
    /// # Errors
    ///
    /// Returns the last segment failure if every segment failed.
    pub async fn run(&self, request: SynthesisRequest, tx: mpsc::Sender<AudioChunk>) -> Result<()> {
        let mut timeline = RequestTimeline::open();
        timeline.record(Stage::ProcessingStart);

        let lang = normalize::canonicalize_lang(&request.language);
        let segments = segmenter::segment_text(&request.text, &self.segmenter_config);
        let format_tag = format!("{:?}", request.format).to_ascii_lowercase();

        let mut emitted_any = false;
        let mut total_audio_secs = 0.0_f64;
        let mut last_error: Option<ServeError> = None;

        for segment in &segments {
            if tx.is_closed() {
                self.metrics.record_client_disconnect();
                info!(request_id = %request.request_id, "client disconnected, aborting stream");
                timeline.record(Stage::RequestComplete);
                return Ok(());
            }

            let cached_primer = if segment.is_primer {
                let key = primer_key(&segment.source_text, &request.voice, request.speed, &lang);
                self.primer_cache.get(&key)
            } else {
                None
            };
            let primer_cache_hit = cached_primer.is_some();

            let samples = match cached_primer {
                Some(samples) => Ok(samples),
                None => {
                    self.synthesize_segment(segment, &request, &lang, &format_tag, &mut timeline)
                        .await
                }
            };

            match samples {
                Ok(samples) => {
                    if segment.is_primer && !primer_cache_hit {
                        let key = primer_key(&segment.source_text, &request.voice, request.speed, &lang);
                        self.primer_cache.put(key, samples.clone());
                    }
                    total_audio_secs += samples.len() as f64 / f64::from(crate::audio::SAMPLE_RATE_HZ);

                    let mut encoded = container::encode_samples(&samples, request.format)?;
                    // §4.10 step 3: a primer cache hit gets a ~50ms silence
                    // pad ahead of the cached bytes so clients that only
                    // start playback after a minimum byte volume don't
                    // stall on a near-instant, very short first chunk.
                    if primer_cache_hit
                        && matches!(request.format, ResponseFormat::Wav | ResponseFormat::Pcm)
                    {
                        let mut padded = container::silence_pad_bytes();
                        padded.append(&mut encoded);
                        encoded = padded;
                    }
                    timeline.record(Stage::ChunkEmitted(segment.index));
                    emitted_any = true;
                    if tx
                        .send(AudioChunk {
                            bytes: encoded,
                            segment_index: segment.index,
                        })
                        .await
                        .is_err()
                    {
                        self.metrics.record_client_disconnect();
                        timeline.record(Stage::RequestComplete);
                        return Ok(());
                    }
                }
                Err(e) => {
                    // §4.10 step 6 / §7: an unrecoverable per-segment failure
                    // is terminal for the request, not just that segment. If
                    // this was the first segment, no chunk has been emitted
                    // yet and `emitted_any` stays false below, so `run`
                    // returns `Err` and the caller surfaces a 500. If a later
                    // segment failed, we stop here and close the stream after
                    // the last successfully emitted chunk rather than
                    // silently skipping ahead to the next segment.
                    warn!(
                        request_id = %request.request_id,
                        segment_index = segment.index,
                        error = %e,
                        "SegmentFailed: aborting remaining segments for this request"
                    );
                    last_error = Some(e);
                    break;
                }
            }
        }

        timeline.record(Stage::RequestComplete);

        if emitted_any {
            self.metrics.record_request(
                &timeline,
                total_audio_secs,
                self.streaming_config.chunk_target_ms,
            );
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| ServeError::SynthesisFailed {
                segment_index: 0,
                reason: "no segments produced audio".to_owned(),
            }))
        }
    }

    /// Phonemize, consult the Inference Cache, and on a miss route through
    /// the Multi-Session Manager. Returns raw f32 samples; the caller owns
    /// encoding and primer caching.
    async fn synthesize_segment(
        &self,
        segment: &Segment,
        request: &SynthesisRequest,
        lang: &str,
        format_tag: &str,
        timeline: &mut RequestTimeline,
    ) -> Result<Vec<f32>> {
        let phonemes = self.g2p.phonemize(&segment.source_text, lang);
        timeline.record(Stage::G2pComplete(segment.index));

        let key = inference_key(
            &segment.source_text,
            &request.voice,
            request.speed,
            lang,
            phonemes.origin,
            format_tag,
        );
        if let Some(cached) = self.inference_cache.get(&key) {
            return Ok(cached.samples);
        }

        timeline.record(Stage::InferenceStart(segment.index));
        // `SessionManager::run_segment` always reports `segment_index: 0`
        // (it has no notion of the request-level segment list); fill in
        // the real index for accurate `SegmentFailed` logging upstream.
        let audio = self
            .session_manager
            .run_segment(&phonemes, &request.voice, request.speed, segment.char_count())
            .await
            .map_err(|e| reindex(e, segment.index))?;
        timeline.record(Stage::InferenceComplete(segment.index));

        // `OrtBackend::run` already ran this buffer through
        // `AudioBuffer::check` with its own fixed thresholds before
        // returning it, so the validity report here is authoritative —
        // re-deriving it from raw samples against the configured
        // `silence_rms_floor` would just duplicate that check with a
        // different threshold. The floor is still used below, just as an
        // additional logging signal rather than a second pass/reject rule.
        if !audio.is_usable() {
            return Err(ServeError::SynthesisFailed {
                segment_index: segment.index,
                reason: "synthesized audio failed corruption checks".to_owned(),
            });
        }
        if matches!(audio.validity, SampleValidity::Quiet) {
            let rms = rms_of(&audio.samples);
            if rms < self.streaming_config.silence_rms_floor {
                warn!(
                    request_id = %request.request_id,
                    segment_index = segment.index,
                    rms,
                    "segment audio below configured silence floor"
                );
            }
        }

        self.inference_cache.put(key, audio.clone());
        Ok(audio.samples)
    }
}

fn reindex(err: ServeError, segment_index: u32) -> ServeError {
    match err {
        ServeError::SynthesisFailed { reason, .. } => ServeError::SynthesisFailed {
            segment_index,
            reason,
        },
        other => other,
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reindex_fills_in_segment_index() {
        let err = ServeError::SynthesisFailed {
            segment_index: 0,
            reason: "boom".to_owned(),
        };
        let reindexed = reindex(err, 3);
        match reindexed {
            ServeError::SynthesisFailed { segment_index, reason } => {
                assert_eq!(segment_index, 3);
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn reindex_passes_through_other_variants() {
        let err = ServeError::BackendUnavailable;
        assert!(matches!(reindex(err, 1), ServeError::BackendUnavailable));
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms_of(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        let samples = vec![0.5_f32; 100];
        assert!((rms_of(&samples) - 0.5).abs() < 1e-6);
    }
}
