//! Deterministic cache key fingerprints.
//!
//! Uses `blake3` for fingerprinting.

use crate::g2p::Origin;

/// Fingerprint of `(primer_text, voice, speed, lang)` for the primer cache.
/// `speed` is quantized to two decimal places before hashing so
/// floating-point jitter doesn't fragment the cache.
#[must_use]
pub fn primer_key(primer_text: &str, voice: &str, speed: f32, lang: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"primer\0");
    hasher.update(primer_text.as_bytes());
    hasher.update(b"\0");
    hasher.update(voice.as_bytes());
    hasher.update(b"\0");
    hasher.update(quantize_speed(speed).as_bytes());
    hasher.update(b"\0");
    hasher.update(lang.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint of `(segment_text, voice, speed, lang, phoneme_origin,
/// format)` for the inference cache. The origin is included so a
/// fallback-origin result never masks a primary-origin difference.
#[must_use]
pub fn inference_key(
    segment_text: &str,
    voice: &str,
    speed: f32,
    lang: &str,
    origin: Origin,
    format: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"inference\0");
    hasher.update(segment_text.as_bytes());
    hasher.update(b"\0");
    hasher.update(voice.as_bytes());
    hasher.update(b"\0");
    hasher.update(quantize_speed(speed).as_bytes());
    hasher.update(b"\0");
    hasher.update(lang.as_bytes());
    hasher.update(b"\0");
    hasher.update(origin_tag(origin).as_bytes());
    hasher.update(b"\0");
    hasher.update(format.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn quantize_speed(speed: f32) -> String {
    format!("{:.2}", speed.clamp(0.5, 2.0))
}

fn origin_tag(origin: Origin) -> &'static str {
    match origin {
        Origin::Primary => "primary",
        Origin::Fallback => "fallback",
        Origin::CharacterFallback => "character_fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primer_key_is_deterministic() {
        let a = primer_key("hello", "af_heart", 1.0, "en-us");
        let b = primer_key("hello", "af_heart", 1.0, "en-us");
        assert_eq!(a, b);
    }

    #[test]
    fn primer_key_differs_on_any_field() {
        let base = primer_key("hello", "af_heart", 1.0, "en-us");
        assert_ne!(base, primer_key("goodbye", "af_heart", 1.0, "en-us"));
        assert_ne!(base, primer_key("hello", "bf_emma", 1.0, "en-us"));
        assert_ne!(base, primer_key("hello", "af_heart", 1.2, "en-us"));
        assert_ne!(base, primer_key("hello", "af_heart", 1.0, "en-gb"));
    }

    #[test]
    fn inference_key_distinguishes_origin() {
        let primary = inference_key("hi", "af_heart", 1.0, "en-us", Origin::Primary, "wav");
        let char_fb = inference_key(
            "hi",
            "af_heart",
            1.0,
            "en-us",
            Origin::CharacterFallback,
            "wav",
        );
        assert_ne!(primary, char_fb);
    }

    #[test]
    fn inference_key_distinguishes_format() {
        let wav = inference_key("hi", "af_heart", 1.0, "en-us", Origin::Primary, "wav");
        let mp3 = inference_key("hi", "af_heart", 1.0, "en-us", Origin::Primary, "mp3");
        assert_ne!(wav, mp3);
    }

    #[test]
    fn speed_quantization_ignores_float_jitter() {
        let a = primer_key("hi", "v", 1.000_000_1, "en-us");
        let b = primer_key("hi", "v", 1.000_000_2, "en-us");
        assert_eq!(a, b);
    }
}
