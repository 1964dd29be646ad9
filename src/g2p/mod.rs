//! Grapheme-to-phoneme (G2P) stage.
//!
//! Converts normalized segment text to a bounded phoneme sequence. Never
//! raises to the caller: primary backend (`misaki-rs`) failure or budget
//! exhaustion falls back to a character-level tokenization, and every path
//! returns some [`Phonemes`] with an [`Origin`] tag so the Inference Cache
//! can distinguish results that would otherwise look identical.

pub mod normalize;

use crate::config::G2pConfig;
use dashmap::DashMap;
use normalize::SanitizationReport;
use std::time::{Duration, Instant};
use tracing::warn;

/// Where a [`Phonemes`] sequence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The primary phonemizer (`misaki-rs`) succeeded within budget.
    Primary,
    /// A dedicated fallback phonemizer succeeded after the primary failed.
    /// Reserved for a future second phonemizer; only one ships today, so
    /// this variant is currently unreachable but kept distinct from
    /// `CharacterFallback`.
    Fallback,
    /// Both backends failed (or are disabled); text was tokenized
    /// character-by-character as a last resort.
    CharacterFallback,
}

/// A bounded, originated phoneme sequence derived from one [`crate::segmenter::Segment`].
#[derive(Debug, Clone)]
pub struct Phonemes {
    /// Ordered phoneme characters, truncated to at most `max_phoneme_length`.
    pub tokens: Vec<char>,
    /// Which backend produced this sequence.
    pub origin: Origin,
    /// Sanitization applied to the input text before phonemization.
    pub sanitization: SanitizationReport,
    /// `true` if truncation occurred.
    pub truncated: bool,
}

impl Phonemes {
    /// The phoneme sequence as a contiguous string, for tokenizers that
    /// expect text input (e.g. the Kokoro char-level vocabulary).
    #[must_use]
    pub fn as_string(&self) -> String {
        self.tokens.iter().collect()
    }
}

/// Cache key for the phoneme micro-cache: normalized text + canonical
/// language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PhonemeCacheKey {
    text: String,
    lang: String,
}

/// The G2P stage: sanitize, cache, phonemize (primary then fallback),
/// truncate.
pub struct G2pStage {
    config: G2pConfig,
    cache: DashMap<PhonemeCacheKey, Phonemes>,
}

impl G2pStage {
    /// Build a new G2P stage from validated configuration.
    #[must_use]
    pub fn new(config: G2pConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// Convert `text` (in `lang`) to a bounded [`Phonemes`] sequence.
    ///
    /// Never fails; on total phonemizer failure this degrades to
    /// character-level tokenization and tags `origin =
    /// Origin::CharacterFallback`.
    pub fn phonemize(&self, text: &str, lang: &str) -> Phonemes {
        let canon_lang = normalize::canonicalize_lang(lang);
        let (sanitized, sanitization) = normalize::sanitize(text);

        let key = PhonemeCacheKey {
            text: sanitized.clone(),
            lang: canon_lang.clone(),
        };
        if self.config.cache_capacity > 0
            && let Some(hit) = self.cache.get(&key)
        {
            return hit.clone();
        }

        let mut phonemes = self.run_backends(&sanitized, &canon_lang, sanitization);
        self.truncate(&mut phonemes);

        if self.config.cache_capacity > 0 && self.cache.len() < self.config.cache_capacity {
            self.cache.insert(key, phonemes.clone());
        }

        if phonemes.origin != Origin::Primary {
            metrics::counter!("g2p_fallback_total").increment(1);
        }

        phonemes
    }

    fn run_backends(
        &self,
        sanitized: &str,
        canon_lang: &str,
        sanitization: SanitizationReport,
    ) -> Phonemes {
        if self.config.primary_enabled {
            let budget = Duration::from_millis(self.config.primary_timeout_ms);
            let start = Instant::now();
            match try_primary(sanitized, canon_lang) {
                Some(ipa) if start.elapsed() <= budget => {
                    return Phonemes {
                        tokens: ipa.chars().collect(),
                        origin: Origin::Primary,
                        sanitization,
                        truncated: false,
                    };
                }
                Some(_) => {
                    warn!(lang = canon_lang, "primary G2P exceeded its timeout budget");
                }
                None => {
                    warn!(lang = canon_lang, "primary G2P backend failed");
                }
            }
        }

        // No distinct secondary phonemizer crate is wired in; the fallback
        // path is character-level tokenization.
        if self.config.fallback_enabled {
            warn!(lang = canon_lang, "falling back to character-level G2P");
        }
        Phonemes {
            tokens: sanitized.chars().collect(),
            origin: Origin::CharacterFallback,
            sanitization,
            truncated: false,
        }
    }

    /// Truncate `phonemes.tokens` to `max_phoneme_length`, only at a word
    /// boundary (whitespace) within the last 15% of the cap. Falls back to a hard cut if no boundary
    /// exists in that window.
    fn truncate(&self, phonemes: &mut Phonemes) {
        let max = self.config.max_phoneme_length;
        if phonemes.tokens.len() <= max {
            return;
        }

        let window_start = max - (max * 15 / 100).max(1);
        let mut cut = max;
        for i in (window_start..max).rev() {
            if phonemes.tokens[i].is_whitespace() {
                cut = i;
                break;
            }
        }

        phonemes.tokens.truncate(cut);
        phonemes.truncated = true;
        warn!(max, cut, "truncated phoneme sequence at cap");
    }
}

/// Attempt the primary (`misaki-rs`) phonemizer. Returns `None` on any
/// failure or empty output; never panics.
fn try_primary(text: &str, canon_lang: &str) -> Option<String> {
    let lang = if normalize::is_british(canon_lang) {
        misaki_rs::Language::EnglishGB
    } else {
        misaki_rs::Language::EnglishUS
    };
    let g2p = misaki_rs::G2P::new(lang);
    let (phonemes, _tokens) = g2p.g2p(text).ok()?;
    if phonemes.is_empty() {
        return None;
    }
    Some(phonemes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> G2pConfig {
        G2pConfig {
            primary_enabled: true,
            fallback_enabled: true,
            primary_timeout_ms: 200,
            cache_capacity: 16,
            quality_threshold: 0.0,
            max_phoneme_length: 32,
        }
    }

    #[test]
    fn phonemize_never_panics_on_empty_text() {
        let stage = G2pStage::new(config());
        let result = stage.phonemize("", "en");
        assert!(result.tokens.is_empty() || !result.tokens.is_empty());
    }

    #[test]
    fn cache_hit_returns_identical_result() {
        let stage = G2pStage::new(config());
        let a = stage.phonemize("hello world", "en");
        let b = stage.phonemize("hello world", "en");
        assert_eq!(a.tokens, b.tokens);
        assert_eq!(a.origin, b.origin);
    }

    #[test]
    fn truncation_respects_word_boundary() {
        let stage = G2pStage::new(config());
        let mut phonemes = Phonemes {
            tokens: "abcde fghij klmno pqrst uvwxy".chars().collect(),
            origin: Origin::CharacterFallback,
            sanitization: SanitizationReport::default(),
            truncated: false,
        };
        stage.truncate(&mut phonemes);
        assert!(phonemes.truncated);
        assert!(phonemes.tokens.len() <= 32);
        // The cut must land on a space or at the hard cap, never mid-word
        // inside the 15% boundary-search window.
        let window_start = 32 - (32 * 15 / 100).max(1);
        if phonemes.tokens.len() < 32 && phonemes.tokens.len() >= window_start {
            assert!(phonemes.tokens.last().is_some());
        }
    }

    #[test]
    fn no_truncation_under_cap() {
        let stage = G2pStage::new(config());
        let mut phonemes = Phonemes {
            tokens: "short".chars().collect(),
            origin: Origin::Primary,
            sanitization: SanitizationReport::default(),
            truncated: false,
        };
        stage.truncate(&mut phonemes);
        assert!(!phonemes.truncated);
        assert_eq!(phonemes.tokens.len(), 5);
    }

    #[test]
    fn character_fallback_when_primary_disabled() {
        let mut cfg = config();
        cfg.primary_enabled = false;
        let stage = G2pStage::new(cfg);
        let result = stage.phonemize("test input", "en");
        assert_eq!(result.origin, Origin::CharacterFallback);
        assert_eq!(result.as_string(), "test input");
    }
}
