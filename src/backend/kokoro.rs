//! Kokoro-82M ONNX backend: one [`OrtBackend`] per accelerator, sharing a
//! tokenizer and voice-style table loaded once by [`crate::model_cache`].

use super::{Backend, BackendCapabilities};
use crate::audio::AudioBuffer;
use crate::error::{BackendId, Result, ServeError};
use crate::g2p::Phonemes;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Maximum context length (phoneme tokens plus the two pad tokens the
/// stripped tokenizer post-processor used to add).
pub const MAX_CONTEXT: usize = 512;

/// Style embedding width.
const STYLE_DIM: usize = 256;

/// One ONNX Runtime session bound to a single accelerator, plus the shared
/// assets every backend needs to run inference.
pub struct OrtBackend {
    backend_id: BackendId,
    session: Session,
    tokenizer: Arc<tokenizers::Tokenizer>,
    voice_styles: Arc<Vec<f32>>,
}

impl OrtBackend {
    /// Build a session for `backend_id` against `model_path`, selecting an
    /// execution provider appropriate to that backend.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Model`] if the ONNX Runtime session cannot be
    /// built or committed.
    pub fn new(
        backend_id: BackendId,
        model_path: &Path,
        tokenizer: Arc<tokenizers::Tokenizer>,
        voice_styles: Arc<Vec<f32>>,
    ) -> Result<Self> {
        let builder = Session::builder()
            .map_err(|e| ServeError::Model(format!("failed to create session builder: {e}")))?
            .with_intra_threads(intra_threads_for(backend_id))
            .map_err(|e| ServeError::Model(format!("failed to configure session threads: {e}")))?;

        let builder = apply_execution_provider(builder, backend_id)?;

        info!(backend = %backend_id, path = %model_path.display(), "committing ONNX session");
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| ServeError::Model(format!("failed to load ONNX model: {e}")))?;

        Ok(Self {
            backend_id,
            session,
            tokenizer,
            voice_styles,
        })
    }
}

impl Backend for OrtBackend {
    fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_concurrent: matches!(self.backend_id, BackendId::Cpu | BackendId::Gpu),
            max_input_len: MAX_CONTEXT,
        }
    }

    fn warmup(&mut self) -> Result<()> {
        let silent = Phonemes {
            tokens: vec!['.'],
            origin: crate::g2p::Origin::Primary,
            sanitization: Default::default(),
            truncated: false,
        };
        self.run(&silent, "warmup", 1.0).map(|_| ())
    }

    fn run(&mut self, phonemes: &Phonemes, _voice_id: &str, speed: f32) -> Result<AudioBuffer> {
        let ipa = phonemes.as_string();
        if ipa.is_empty() {
            return Ok(AudioBuffer {
                samples: Vec::new(),
                validity: crate::audio::SampleValidity::Ok,
            });
        }

        let encoding = self
            .tokenizer
            .encode(ipa.as_str(), false)
            .map_err(|e| ServeError::PermanentBackendError {
                backend: self.backend_id,
                message: format!("tokenization failed: {e}"),
            })?;

        let raw_ids = encoding.get_ids();
        let mut token_ids: Vec<i64> = Vec::with_capacity(raw_ids.len() + 2);
        token_ids.push(0); // pad token at start (post_processor stripped, added manually)
        token_ids.extend(raw_ids.iter().map(|&id| i64::from(id)));
        token_ids.push(0); // pad token at end

        if token_ids.len() > MAX_CONTEXT {
            return Err(ServeError::InputTooLong {
                backend: self.backend_id,
                tokens: token_ids.len(),
                max: MAX_CONTEXT,
            });
        }

        let content_len = token_ids.len().saturating_sub(2).max(1);
        let num_entries = self.voice_styles.len() / STYLE_DIM;
        if num_entries == 0 {
            return Err(ServeError::PermanentBackendError {
                backend: self.backend_id,
                message: "voice style table is empty".to_owned(),
            });
        }
        let style_index = content_len.min(num_entries - 1);
        let style_offset = style_index * STYLE_DIM;
        let style = self.voice_styles[style_offset..style_offset + STYLE_DIM].to_vec();

        let samples = self.run_inference(&token_ids, &style, speed)?;

        // A generous floor; the Streaming Engine re-checks against the
        // operator-configured floor before deciding whether to log a
        // warning or emit the chunk as-is.
        Ok(AudioBuffer::check(samples, 1e-4, 1e-6))
    }
}

impl OrtBackend {
    fn run_inference(&mut self, token_ids: &[i64], style: &[f32], speed: f32) -> Result<Vec<f32>> {
        let seq_len = token_ids.len();
        let backend_id = self.backend_id;

        let input_ids = Tensor::from_array(([1_usize, seq_len], token_ids.to_vec())).map_err(|e| {
            ServeError::PermanentBackendError {
                backend: backend_id,
                message: format!("failed to build input_ids tensor: {e}"),
            }
        })?;
        let style_tensor =
            Tensor::from_array(([1_usize, STYLE_DIM], style.to_vec())).map_err(|e| {
                ServeError::PermanentBackendError {
                    backend: backend_id,
                    message: format!("failed to build style tensor: {e}"),
                }
            })?;
        let speed_tensor = Tensor::from_array(([1_usize], vec![speed])).map_err(|e| {
            ServeError::PermanentBackendError {
                backend: backend_id,
                message: format!("failed to build speed tensor: {e}"),
            }
        })?;

        let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
        feed.insert("input_ids".to_owned(), input_ids.into());
        feed.insert("style".to_owned(), style_tensor.into());
        feed.insert("speed".to_owned(), speed_tensor.into());

        let outputs = self
            .session
            .run(SessionInputs::from(feed))
            .map_err(|e| ServeError::TransientBackendError {
                backend: backend_id,
                message: format!("ONNX inference failed: {e}"),
            })?;

        let (_shape, data) = outputs[0_usize]
            .try_extract_tensor::<f32>()
            .map_err(|e| ServeError::PermanentBackendError {
                backend: backend_id,
                message: format!("failed to extract output tensor: {e}"),
            })?;

        Ok(data.to_vec())
    }
}

fn intra_threads_for(backend_id: BackendId) -> usize {
    match backend_id {
        BackendId::Cpu => 4,
        BackendId::Ane | BackendId::Gpu => 1,
    }
}

fn apply_execution_provider(
    builder: ort::session::builder::SessionBuilder,
    backend_id: BackendId,
) -> Result<ort::session::builder::SessionBuilder> {
    match backend_id {
        BackendId::Ane => with_ane_provider(builder),
        BackendId::Gpu => with_gpu_provider(builder),
        BackendId::Cpu => Ok(builder),
    }
}

#[cfg(target_os = "macos")]
fn with_ane_provider(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::CoreMLExecutionProvider;
    builder
        .with_execution_providers([CoreMLExecutionProvider::default().build()])
        .map_err(|e| ServeError::Model(format!("failed to register CoreML provider: {e}")))
}

#[cfg(not(target_os = "macos"))]
fn with_ane_provider(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    let _ = &builder;
    Err(ServeError::Config(
        "the ane backend is only available on macOS".to_owned(),
    ))
}

#[cfg(feature = "cuda")]
fn with_gpu_provider(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;
    builder
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .map_err(|e| ServeError::Model(format!("failed to register CUDA provider: {e}")))
}

#[cfg(all(feature = "directml", not(feature = "cuda")))]
fn with_gpu_provider(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::DirectMLExecutionProvider;
    builder
        .with_execution_providers([DirectMLExecutionProvider::default().build()])
        .map_err(|e| ServeError::Model(format!("failed to register DirectML provider: {e}")))
}

#[cfg(not(any(feature = "cuda", feature = "directml")))]
fn with_gpu_provider(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    let _ = &builder;
    Err(ServeError::Config(
        "the gpu backend requires building with the cuda or directml feature".to_owned(),
    ))
}

/// Load and patch the Kokoro tokenizer.
///
/// The `tokenizers` crate cannot deserialize the `TemplateProcessing`
/// post-processor shipped in Kokoro's `tokenizer.json`. It's stripped here;
/// [`OrtBackend::run`] adds the two pad tokens it would have added, by hand.
pub fn load_tokenizer(path: &Path) -> Result<tokenizers::Tokenizer> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServeError::Model(format!("failed to read tokenizer file {}: {e}", path.display())))?;

    let mut json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| ServeError::Model(format!("failed to parse tokenizer JSON: {e}")))?;

    if let Some(obj) = json.as_object_mut() {
        obj.remove("post_processor");

        if let Some(model) = obj.get_mut("model").and_then(|m| m.as_object_mut()) {
            model
                .entry("type")
                .or_insert_with(|| serde_json::Value::String("WordLevel".to_owned()));
            model
                .entry("unk_token")
                .or_insert_with(|| serde_json::Value::String("$".to_owned()));
        }
    }

    let patched = serde_json::to_string(&json)
        .map_err(|e| ServeError::Model(format!("failed to serialize patched tokenizer: {e}")))?;

    tokenizers::Tokenizer::from_bytes(patched)
        .map_err(|e| ServeError::Model(format!("failed to load tokenizer: {e}")))
}

/// Load a voice style `.bin` file as a flat f32 vector of shape `(N, 1,
/// 256)`, stored flat and indexed by `[i * 256 .. (i+1) * 256]`.
pub fn load_voice_styles(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| ServeError::Model(format!("failed to read voice file {}: {e}", path.display())))?;

    if bytes.len() % 4 != 0 {
        return Err(ServeError::Model(format!(
            "voice file size {} is not a multiple of 4 (expected f32 array)",
            bytes.len()
        )));
    }
    let float_count = bytes.len() / 4;
    if float_count % STYLE_DIM != 0 {
        return Err(ServeError::Model(format!(
            "voice file has {float_count} floats, not a multiple of {STYLE_DIM}"
        )));
    }

    let mut floats = vec![0.0f32; float_count];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        floats[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(floats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intra_threads_match_backend_concurrency_profile() {
        assert_eq!(intra_threads_for(BackendId::Cpu), 4);
        assert_eq!(intra_threads_for(BackendId::Ane), 1);
        assert_eq!(intra_threads_for(BackendId::Gpu), 1);
    }

    #[test]
    fn load_voice_styles_rejects_misaligned_file() {
        let dir = std::env::temp_dir().join(format!(
            "kokoro-serve-voice-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("tmp dir");
        let path = dir.join("bad.bin");
        std::fs::write(&path, [0u8; 6]).expect("write");
        assert!(load_voice_styles(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_voice_styles_accepts_aligned_file() {
        let dir = std::env::temp_dir().join(format!(
            "kokoro-serve-voice-test-ok-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("tmp dir");
        let path = dir.join("good.bin");
        let floats = vec![0.0f32; STYLE_DIM * 2];
        let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(&path, bytes).expect("write");
        let loaded = load_voice_styles(&path).expect("load");
        assert_eq!(loaded.len(), STYLE_DIM * 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
