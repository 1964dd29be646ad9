//! Model Cache: lazily builds and retains one [`OrtBackend`] per
//! [`BackendId`], sharing a single downloaded tokenizer and voice style
//! table across all of them.
//!
//! Construction is `tokio::sync::OnceCell`-guarded so concurrent first
//! requests for the same backend share one ONNX session build instead of
//! racing to build (and leak) several.

use crate::backend::kokoro::{self, OrtBackend};
use crate::error::{BackendId, Result, ServeError};
use crate::models::ModelManager;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::info;

/// HuggingFace repo carrying the Kokoro-82M ONNX export, tokenizer, and
/// voice style tensors.
pub const KOKORO_REPO_ID: &str = "onnx-community/Kokoro-82M-v1.0-ONNX";

/// Map a configured quantization variant to its ONNX filename inside the
/// repo's `onnx/` subfolder. Unknown variants fall back to `q8`.
#[must_use]
pub fn model_filename(variant: &str) -> &'static str {
    match variant {
        "fp32" => "onnx/model.onnx",
        "fp16" => "onnx/model_fp16.onnx",
        "q8" | "quantized" => "onnx/model_quantized.onnx",
        "q8f16" => "onnx/model_q8f16.onnx",
        "q4" => "onnx/model_q4.onnx",
        "q4f16" => "onnx/model_q4f16.onnx",
        other => {
            tracing::warn!(variant = other, "unknown model variant, falling back to q8");
            "onnx/model_quantized.onnx"
        }
    }
}

/// Repo-relative path to a built-in voice's style tensor file.
#[must_use]
pub fn voice_filename(voice: &str) -> String {
    format!("voices/{voice}.bin")
}

/// Voice identifiers shipped in [`KOKORO_REPO_ID`]'s `voices/` directory,
/// for `GET /voices` and request validation. Each backend instance only
/// ever loads the one style tensor configured as `model.default_voice`;
/// this list exists for the public API surface, not the synthesis path.
pub const KNOWN_VOICES: &[&str] = &[
    "af_heart", "af_alloy", "af_aoede", "af_bella", "af_jessica", "af_kore", "af_nicole",
    "af_nova", "af_river", "af_sarah", "af_sky", "am_adam", "am_echo", "am_eric", "am_fenrir",
    "am_liam", "am_michael", "am_onyx", "am_puck", "am_santa", "bf_alice", "bf_emma",
    "bf_isabella", "bf_lily", "bm_daniel", "bm_fable", "bm_george", "bm_lewis",
];

/// A backend instance plus a lock serializing `run` calls on its (not
/// thread-safe) ONNX session.
pub type SharedBackend = Arc<AsyncMutex<OrtBackend>>;

/// Lazily-initialized, shared-asset store of per-backend ONNX sessions.
pub struct ModelCache {
    model_manager: ModelManager,
    variant: String,
    default_voice: String,
    tokenizer: OnceCell<Arc<tokenizers::Tokenizer>>,
    voice_styles: OnceCell<Arc<Vec<f32>>>,
    backends: DashMap<BackendId, Arc<OnceCell<SharedBackend>>>,
}

impl ModelCache {
    /// Build a cache that downloads assets via `model_manager` for the
    /// configured `variant`/`default_voice`.
    #[must_use]
    pub fn new(model_manager: ModelManager, variant: String, default_voice: String) -> Self {
        Self {
            model_manager,
            variant,
            default_voice,
            tokenizer: OnceCell::new(),
            voice_styles: OnceCell::new(),
            backends: DashMap::new(),
        }
    }

    /// Return the existing backend for `backend_id`, or build, warm
    /// (caller-driven), and retain a new one.
    ///
    /// Concurrent first callers for the same `backend_id` coalesce onto a
    /// single build via a per-key [`OnceCell`]: the `DashMap` only ever
    /// guards *which cell* a key maps to, never the (potentially slow)
    /// build itself, so two requests racing on a cold backend never build
    /// two ONNX sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if asset download, tokenizer/voice-style loading, or
    /// ONNX session construction fails.
    pub async fn get_or_init(&self, backend_id: BackendId) -> Result<SharedBackend> {
        let cell = self
            .backends
            .entry(backend_id)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async move {
            let tokenizer = self.shared_tokenizer().await?;
            let voice_styles = self.shared_voice_styles().await?;
            let model_path = self.download_model().await?;

            info!(backend = %backend_id, "building ONNX session");
            let backend = tokio::task::spawn_blocking(move || {
                OrtBackend::new(backend_id, &model_path, tokenizer, voice_styles)
            })
            .await
            .map_err(|e| ServeError::Model(format!("backend build task panicked: {e}")))??;

            Ok::<_, ServeError>(Arc::new(AsyncMutex::new(backend)))
        })
        .await
        .map(Clone::clone)
    }

    /// Drop the retained backend (and its ONNX session) for `backend_id`,
    /// freeing its memory. A later [`get_or_init`](Self::get_or_init) call
    /// rebuilds it from scratch.
    pub fn drop_backend(&self, backend_id: BackendId) {
        self.backends.remove(&backend_id);
    }

    /// `true` if `backend_id` currently has a retained, fully-initialized
    /// session.
    #[must_use]
    pub fn is_loaded(&self, backend_id: BackendId) -> bool {
        self.backends
            .get(&backend_id)
            .is_some_and(|cell| cell.initialized())
    }

    async fn shared_tokenizer(&self) -> Result<Arc<tokenizers::Tokenizer>> {
        let manager = self.model_manager.clone();
        let cell = self
            .tokenizer
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(move || {
                    let path = manager.get_or_download(KOKORO_REPO_ID, "tokenizer.json", None)?;
                    let tok = kokoro::load_tokenizer(&path)?;
                    Ok::<_, ServeError>(Arc::new(tok))
                })
                .await
                .map_err(|e| ServeError::Model(format!("tokenizer load task panicked: {e}")))?
            })
            .await?;
        Ok(cell.clone())
    }

    async fn shared_voice_styles(&self) -> Result<Arc<Vec<f32>>> {
        let manager = self.model_manager.clone();
        let voice_file = voice_filename(&self.default_voice);
        let cell = self
            .voice_styles
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(move || {
                    let path = manager.get_or_download(KOKORO_REPO_ID, &voice_file, None)?;
                    let styles = kokoro::load_voice_styles(&path)?;
                    Ok::<_, ServeError>(Arc::new(styles))
                })
                .await
                .map_err(|e| ServeError::Model(format!("voice style load task panicked: {e}")))?
            })
            .await?;
        Ok(cell.clone())
    }

    async fn download_model(&self) -> Result<PathBuf> {
        let manager = self.model_manager.clone();
        let filename = model_filename(&self.variant).to_owned();
        // get_or_download is a blocking network call; keep it off the async
        // executor thread.
        tokio::task::spawn_blocking(move || manager.get_or_download(KOKORO_REPO_ID, &filename, None))
            .await
            .map_err(|e| ServeError::Model(format!("model download task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_filename_maps_known_variants() {
        assert_eq!(model_filename("fp32"), "onnx/model.onnx");
        assert_eq!(model_filename("q8"), "onnx/model_quantized.onnx");
        assert_eq!(model_filename("q4f16"), "onnx/model_q4f16.onnx");
    }

    #[test]
    fn model_filename_falls_back_for_unknown_variant() {
        assert_eq!(model_filename("bogus"), "onnx/model_quantized.onnx");
    }

    #[test]
    fn voice_filename_is_repo_relative() {
        assert_eq!(voice_filename("af_heart"), "voices/af_heart.bin");
    }

    #[test]
    fn known_voices_contains_default_voice() {
        assert!(KNOWN_VOICES.contains(&"af_heart"));
    }
}
