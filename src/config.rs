//! Configuration for the TTS serving engine.
//!
//! Recognized options are enumerated below, each with a validated default.
//! Loading layers a TOML file (optional) under environment variable
//! overrides (prefix `KOKORO_TTS`, `__` as the nesting separator), following
//! the `config` crate's builder pattern. Unknown keys are rejected at
//! startup in both layers: `serde(deny_unknown_fields)` covers the file,
//! and [`reject_unknown_env`] covers the environment (the `config` crate's
//! `Environment` source silently ignores env vars that don't map onto a
//! known field, so this scan closes that gap explicitly).

use crate::error::{Result, ServeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the serving engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    /// HTTP bind address, e.g. `"0.0.0.0:8080"`.
    pub bind_addr: String,
    /// Maximum accepted request text length, in characters.
    pub max_text_len: usize,
    /// Accelerator backend selection policy.
    pub backend: BackendSelection,
    /// Maximum number of concurrent in-flight inferences per backend.
    pub max_concurrent_per_backend: MaxConcurrentPerBackend,
    /// ONNX graph optimization level.
    pub graph_optimization: GraphOptimizationLevel,
    /// ONNX Runtime memory arena size in bytes. `None` lets the runtime
    /// pick, sized relative to probed RAM.
    pub memory_arena_bytes: Option<u64>,
    /// Text segmentation thresholds.
    pub segmenter: SegmenterConfig,
    /// G2P stage configuration.
    pub g2p: G2pConfig,
    /// Inference (per-segment audio) cache configuration.
    pub inference_cache: InferenceCacheConfig,
    /// Primer micro-cache configuration.
    pub primer_cache: PrimerCacheConfig,
    /// Streaming Engine configuration.
    pub streaming: StreamingConfig,
    /// Keep-Alive Service configuration.
    pub keep_alive: KeepAliveConfig,
    /// Memory usage warning threshold in bytes. `None` auto-sizes from the
    /// Capability Probe's `total_ram_bytes` (a fraction of total RAM).
    pub memory_warning_bytes: Option<u64>,
    /// Model asset configuration (voice, variant, HF repo).
    pub model: ModelAssetConfig,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_owned(),
            max_text_len: 5_000,
            backend: BackendSelection::Auto,
            max_concurrent_per_backend: MaxConcurrentPerBackend::default(),
            graph_optimization: GraphOptimizationLevel::All,
            memory_arena_bytes: None,
            segmenter: SegmenterConfig::default(),
            g2p: G2pConfig::default(),
            inference_cache: InferenceCacheConfig::default(),
            primer_cache: PrimerCacheConfig::default(),
            streaming: StreamingConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            memory_warning_bytes: None,
            model: ModelAssetConfig::default(),
        }
    }
}

/// Backend selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    /// Probe capabilities and route per the tie-broken policy.
    #[default]
    Auto,
    /// Force the Apple Neural Engine backend only.
    Ane,
    /// Force the GPU backend only.
    Gpu,
    /// Force the CPU backend only.
    Cpu,
    /// Prefer ANE, falling back only to CPU (skip GPU).
    AneThenCpu,
}

/// Per-backend concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxConcurrentPerBackend {
    /// Concurrency limit for the ANE backend (typically 1).
    pub ane: usize,
    /// Concurrency limit for the GPU backend.
    pub gpu: usize,
    /// Concurrency limit for the CPU backend.
    pub cpu: usize,
}

impl Default for MaxConcurrentPerBackend {
    fn default() -> Self {
        Self {
            ane: 1,
            gpu: 2,
            cpu: 4,
        }
    }
}

/// ONNX Runtime graph optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptimizationLevel {
    /// Constant folding and redundant node elimination only.
    Basic,
    /// Basic plus node fusions.
    Extended,
    /// All available optimizations, including layout transforms.
    #[default]
    All,
}

/// Text Segmenter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Below this length, the whole request is a single primer segment.
    pub short_threshold: usize,
    /// Hard cap on primer segment size, in characters.
    pub primer_max_chars: usize,
    /// Hard cap on non-primer segment size, in characters.
    pub segment_max_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            short_threshold: 150,
            primer_max_chars: 700,
            segment_max_chars: 500,
        }
    }
}

/// G2P stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct G2pConfig {
    /// Whether the primary G2P backend is enabled.
    pub primary_enabled: bool,
    /// Whether the fallback (character-level) G2P path is enabled.
    pub fallback_enabled: bool,
    /// Wall-clock budget for the primary backend, in milliseconds.
    pub primary_timeout_ms: u64,
    /// Phoneme micro-cache capacity (entries).
    pub cache_capacity: usize,
    /// Minimum acceptable phoneme-output quality score before falling back
    /// (reserved for future phonemizer quality scoring; unused today but
    /// validated so config files written against the full surface don't
    /// fail to round-trip).
    pub quality_threshold: f32,
    /// Hard cap on phoneme sequence length.
    pub max_phoneme_length: usize,
}

impl Default for G2pConfig {
    fn default() -> Self {
        Self {
            primary_enabled: true,
            fallback_enabled: true,
            primary_timeout_ms: 200,
            cache_capacity: 256,
            quality_threshold: 0.0,
            max_phoneme_length: 512,
        }
    }
}

/// Inference cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceCacheConfig {
    /// Maximum entries.
    pub capacity: usize,
    /// Entry time-to-live in seconds.
    pub ttl_seconds: u64,
}

impl Default for InferenceCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            ttl_seconds: 3_600,
        }
    }
}

/// Primer micro-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimerCacheConfig {
    /// Maximum entries.
    pub capacity: usize,
}

impl Default for PrimerCacheConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Streaming Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Target audio duration per emitted chunk, in milliseconds.
    pub chunk_target_ms: u64,
    /// Number of chunks to prebuffer before the first emit (0 = emit ASAP).
    pub prebuffer_chunks: usize,
    /// RMS floor below which a segment is logged as "silent" but still
    /// emitted (unless corruption detection rejects it outright).
    pub silence_rms_floor: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_target_ms: 200,
            prebuffer_chunks: 0,
            silence_rms_floor: 1e-4,
        }
    }
}

/// Keep-Alive Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Whether the keep-alive background task runs at all.
    pub enabled: bool,
    /// Tick interval in seconds.
    pub interval_seconds: u64,
    /// A backend is re-warmed only if idle longer than this, in seconds.
    pub idle_threshold_seconds: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            idle_threshold_seconds: 120,
        }
    }
}

/// Model asset configuration: which Kokoro variant/voice to load and from
/// where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelAssetConfig {
    /// Quantization variant, e.g. `"fp32"`, `"fp16"`, `"q8"`, `"q4"`.
    pub variant: String,
    /// Default voice identifier, e.g. `"af_heart"`.
    pub default_voice: String,
}

impl Default for ModelAssetConfig {
    fn default() -> Self {
        Self {
            variant: "q8".to_owned(),
            default_voice: "af_heart".to_owned(),
        }
    }
}

impl ServeConfig {
    /// Load configuration from an optional TOML file, layered under
    /// environment variable overrides, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed, an environment variable
    /// name is unrecognized, a value fails to type-check, or the merged
    /// configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        reject_unknown_env()?;

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).required(false),
            );
        } else {
            builder = builder.add_source(
                config::File::with_name(
                    crate::paths::config_file().to_string_lossy().as_ref(),
                )
                .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("KOKORO_TTS")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| ServeError::Config(format!("failed to build configuration: {e}")))?;

        let config: Self = built
            .try_deserialize()
            .map_err(|e| ServeError::Config(format!("failed to parse configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants not already enforced by the type
    /// system (ranges, non-zero capacities, ordering between thresholds).
    ///
    /// # Errors
    ///
    /// Returns a [`ServeError::Config`] describing the first violated
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        if self.max_text_len == 0 {
            return Err(ServeError::Config("max_text_len must be > 0".into()));
        }
        if self.segmenter.primer_max_chars == 0 || self.segmenter.segment_max_chars == 0 {
            return Err(ServeError::Config(
                "segmenter char caps must be > 0".into(),
            ));
        }
        if self.g2p.max_phoneme_length == 0 {
            return Err(ServeError::Config("max_phoneme_length must be > 0".into()));
        }
        if self.inference_cache.capacity == 0 {
            return Err(ServeError::Config(
                "inference_cache.capacity must be > 0".into(),
            ));
        }
        if self.primer_cache.capacity == 0 {
            return Err(ServeError::Config(
                "primer_cache.capacity must be > 0".into(),
            ));
        }
        if self.max_concurrent_per_backend.cpu == 0 {
            return Err(ServeError::Config(
                "max_concurrent_per_backend.cpu must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Field paths recognized under the `KOKORO_TTS` environment prefix,
/// `__`-separated and upper-cased, mirroring [`ServeConfig`]'s shape.
const KNOWN_ENV_SUFFIXES: &[&str] = &[
    "BIND_ADDR",
    "MAX_TEXT_LEN",
    "BACKEND",
    "MAX_CONCURRENT_PER_BACKEND__ANE",
    "MAX_CONCURRENT_PER_BACKEND__GPU",
    "MAX_CONCURRENT_PER_BACKEND__CPU",
    "GRAPH_OPTIMIZATION",
    "MEMORY_ARENA_BYTES",
    "SEGMENTER__SHORT_THRESHOLD",
    "SEGMENTER__PRIMER_MAX_CHARS",
    "SEGMENTER__SEGMENT_MAX_CHARS",
    "G2P__PRIMARY_ENABLED",
    "G2P__FALLBACK_ENABLED",
    "G2P__PRIMARY_TIMEOUT_MS",
    "G2P__CACHE_CAPACITY",
    "G2P__QUALITY_THRESHOLD",
    "G2P__MAX_PHONEME_LENGTH",
    "INFERENCE_CACHE__CAPACITY",
    "INFERENCE_CACHE__TTL_SECONDS",
    "PRIMER_CACHE__CAPACITY",
    "STREAMING__CHUNK_TARGET_MS",
    "STREAMING__PREBUFFER_CHUNKS",
    "STREAMING__SILENCE_RMS_FLOOR",
    "KEEP_ALIVE__ENABLED",
    "KEEP_ALIVE__INTERVAL_SECONDS",
    "KEEP_ALIVE__IDLE_THRESHOLD_SECONDS",
    "MEMORY_WARNING_BYTES",
    "MODEL__VARIANT",
    "MODEL__DEFAULT_VOICE",
];

/// Full variable names that share the `KOKORO_TTS_` prefix but configure
/// filesystem locations (see `crate::paths`) rather than a [`ServeConfig`]
/// field, so they're exempt from the [`KNOWN_ENV_SUFFIXES`] scan below.
const NON_CONFIG_ENV_VARS: &[&str] = &["KOKORO_TTS_CONFIG_DIR", "KOKORO_TTS_CACHE_DIR"];

/// Reject any `KOKORO_TTS_*` environment variable whose suffix isn't one of
/// [`KNOWN_ENV_SUFFIXES`].
///
/// `config::Environment` silently drops env vars it can't map onto a field,
/// which would let a typo'd override pass without warning. This scan runs
/// before the `config` crate sees the environment and turns that silence
/// into a startup error, satisfying "Unknown options are rejected at
/// startup with a clear error" for the environment layer.
///
/// # Errors
///
/// Returns an error naming the first unrecognized variable.
fn reject_unknown_env() -> Result<()> {
    for (key, _) in std::env::vars() {
        if NON_CONFIG_ENV_VARS.contains(&key.as_str()) {
            continue;
        }
        let Some(suffix) = key.strip_prefix("KOKORO_TTS_") else {
            continue;
        };
        if !KNOWN_ENV_SUFFIXES.contains(&suffix) {
            return Err(ServeError::Config(format!(
                "unrecognized environment variable: KOKORO_TTS_{suffix}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ServeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_text_len_rejected() {
        let mut cfg = ServeConfig::default();
        cfg.max_text_len = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_cache_capacity_rejected() {
        let mut cfg = ServeConfig::default();
        cfg.inference_cache.capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_cpu_concurrency_rejected() {
        let mut cfg = ServeConfig::default();
        cfg.max_concurrent_per_backend.cpu = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backend_selection_serializes_snake_case() {
        let s = serde_json::to_string(&BackendSelection::AneThenCpu).unwrap_or_default();
        assert_eq!(s, "\"ane_then_cpu\"");
    }

    #[test]
    fn unknown_env_var_is_rejected() {
        let key = "KOKORO_TTS_NOT_A_REAL_FIELD";
        // SAFETY: tests run single-threaded per module.
        unsafe { std::env::set_var(key, "1") };
        let result = reject_unknown_env();
        unsafe { std::env::remove_var(key) };
        assert!(result.is_err());
    }

    #[test]
    fn known_env_var_passes() {
        let key = "KOKORO_TTS_MAX_TEXT_LEN";
        unsafe { std::env::set_var(key, "1000") };
        let result = reject_unknown_env();
        unsafe { std::env::remove_var(key) };
        assert!(result.is_ok());
    }

    #[test]
    fn path_override_env_vars_are_exempt() {
        let key = "KOKORO_TTS_CACHE_DIR";
        unsafe { std::env::set_var(key, "/tmp/whatever") };
        let result = reject_unknown_env();
        unsafe { std::env::remove_var(key) };
        assert!(result.is_ok());
    }

    #[test]
    fn toml_round_trip_rejects_unknown_key() {
        let toml_str = "unknown_top_level_key = 1\n";
        let result: std::result::Result<ServeConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
