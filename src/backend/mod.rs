//! Inference Backend Adapter.
//!
//! A uniform operation interface over one neural-runtime backend. Each
//! concrete backend variant owns its own ONNX Runtime session but shares
//! the tokenizer, phonemizer vocabulary, and voice style table loaded once
//! by [`crate::model_cache`].
//!
//! Backends implement a small capability set (construction handles `init`,
//! then `warmup`, then `run`) rather than relying on inheritance or duck
//! typing.

pub mod kokoro;
pub mod warmup;

use crate::audio::AudioBuffer;
use crate::error::{BackendId, Result};
use crate::g2p::Phonemes;

/// Static capability flags a backend reports once at construction.
#[derive(Debug, Clone, Copy)]
pub struct BackendCapabilities {
    /// Whether more than one inference may run concurrently on this
    /// backend (typically `false` for `ane`, `true` for `cpu`).
    pub supports_concurrent: bool,
    /// Maximum accepted input length, in phoneme tokens (including any
    /// framing tokens the backend adds internally).
    pub max_input_len: usize,
}

/// Uniform operation interface over one accelerator backend.
///
/// Contract: `run` may block the caller thread (I/O-free, compute-bound)
/// and is **not** thread-safe per-session — callers
/// serialize access per session, which [`crate::session_manager`] enforces
/// via a per-backend semaphore plus a mutex around each session's `run`
/// call. Cold-start cost may be significant on the first call; [`warmup`]
/// exists precisely to pay that cost outside the request path.
pub trait Backend: Send {
    /// Which backend id this instance serves.
    fn backend_id(&self) -> BackendId;

    /// Static capability flags for this backend instance.
    fn capabilities(&self) -> BackendCapabilities;

    /// Run a minimal inference to force lazy graph/kernel compilation.
    /// Idempotent in effect (repeated calls just repeat the cost); the
    /// [`warmup`](warmup) coordinator ensures it only runs once per process
    /// per backend.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the warm-up inference itself fails.
    fn warmup(&mut self) -> Result<()>;

    /// Synthesize `phonemes` at `voice_id`/`speed` on this backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ServeError::InputTooLong`] without invoking
    /// the runtime if `phonemes` exceeds this backend's `max_input_len`, or
    /// a transient/permanent backend error if the runtime call fails.
    fn run(&mut self, phonemes: &Phonemes, voice_id: &str, speed: f32) -> Result<AudioBuffer>;
}
