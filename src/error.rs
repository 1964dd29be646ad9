//! Error taxonomy for the TTS serving engine.
//!
//! Kinds map directly to the propagation policy: most are recovered locally
//! (retry, fallback, sanitize) and never reach the HTTP boundary. Variants
//! that do escape carry enough detail for [`crate::api::types::ErrorBody`]
//! to pick the right status code.

use std::fmt;

/// Top-level error type for the serving engine.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Malformed request: empty text, unknown voice/format/language, speed
    /// out of range. Surfaced as `400`, never retried.
    #[error("invalid request: {0}")]
    InputError(String),

    /// Request text exceeds `max_text_len`. Surfaced as `413`.
    #[error("text exceeds maximum length of {max} characters ({actual} given)")]
    TextTooLong {
        /// Configured limit.
        max: usize,
        /// Actual length of the offending text.
        actual: usize,
    },

    /// A single backend call failed but is retryable. Recovered locally by
    /// the Multi-Session Manager (retry once, then fall back); only
    /// constructed internally, never returned from a public API call.
    #[error("transient backend error on {backend}: {message}")]
    TransientBackendError {
        /// Backend identifier (`ane`, `gpu`, `cpu`).
        backend: BackendId,
        /// Underlying message.
        message: String,
    },

    /// A backend call failed in a way that should blacklist the backend for
    /// the remainder of the process (until operator intervention).
    #[error("permanent backend error on {backend}: {message}")]
    PermanentBackendError {
        /// Backend identifier.
        backend: BackendId,
        /// Underlying message.
        message: String,
    },

    /// Input length exceeds the session's `max_input_len`; the runtime is
    /// never invoked.
    #[error("input too long for backend {backend}: {tokens} tokens (max {max})")]
    InputTooLong {
        /// Backend identifier.
        backend: BackendId,
        /// Token count submitted.
        tokens: usize,
        /// Maximum accepted by the session.
        max: usize,
    },

    /// The runtime returned a tensor shape that doesn't match expectations.
    #[error("shape mismatch on {backend}: {0}", backend = .0)]
    ShapeMismatch(BackendId),

    /// No model instance is ready on any backend.
    #[error("no backend ready")]
    BackendUnavailable,

    /// No backend could produce a valid audio buffer for a segment. `500`
    /// if the first segment of a request, otherwise the stream is closed
    /// after the last good chunk.
    #[error("synthesis failed for segment {segment_index}: {reason}")]
    SynthesisFailed {
        /// Index of the segment that failed.
        segment_index: u32,
        /// Human-readable reason.
        reason: String,
    },

    /// Per-backend concurrency queue is full. Surfaced as `503` with a
    /// `Retry-After` hint.
    #[error("capacity exceeded on backend {0}")]
    CapacityExceeded(BackendId),

    /// Model asset download or load failure.
    #[error("model error: {0}")]
    Model(String),

    /// Configuration error (validation failure, unknown key).
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which accelerator backend an error or route refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Apple Neural Engine (CoreML execution provider).
    Ane,
    /// Discrete/integrated GPU (CUDA or DirectML execution provider).
    Gpu,
    /// CPU execution provider — always expected to be available.
    Cpu,
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendId::Ane => "ane",
            BackendId::Gpu => "gpu",
            BackendId::Cpu => "cpu",
        };
        f.write_str(s)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ServeError>;
