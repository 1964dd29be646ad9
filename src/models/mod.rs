//! Model asset downloading and caching via `hf-hub`.
//!
//! The core persists nothing required for correctness; the ONNX model,
//! tokenizer, and voice style files fetched here are an advisory, resumable
//! local cache. `hf-hub` itself de-duplicates downloads by content hash, so
//! [`ModelManager`] only needs to decide whether a file is already local
//! before reporting progress.

use crate::error::{Result, ServeError};
use crate::progress::{ProgressCallback, ProgressEvent};
use std::path::PathBuf;
use tracing::info;

/// Manages downloading and caching of ONNX model assets from HuggingFace Hub.
///
/// Cheap to clone: it's just the cache directory path, so callers can move
/// an owned copy into a blocking task.
#[derive(Debug, Clone)]
pub struct ModelManager {
    cache_dir: PathBuf,
}

impl ModelManager {
    /// Create a new model manager rooted at `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        info!("model cache directory: {}", cache_dir.display());
        Ok(Self { cache_dir })
    }

    /// Download a file from a HuggingFace repo, or return its cached path.
    ///
    /// Emits [`ProgressEvent::Cached`] or
    /// [`ProgressEvent::DownloadStarted`]/[`ProgressEvent::DownloadComplete`]
    /// through `callback` if provided.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    pub fn get_or_download(
        &self,
        repo_id: &str,
        filename: &str,
        callback: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        let cache = hf_hub::Cache::default();
        if let Some(path) = cache.model(repo_id.to_owned()).get(filename) {
            if let Some(cb) = callback {
                cb(ProgressEvent::Cached {
                    repo_id: repo_id.to_owned(),
                    filename: filename.to_owned(),
                });
            }
            return Ok(path);
        }

        if let Some(cb) = callback {
            cb(ProgressEvent::DownloadStarted {
                repo_id: repo_id.to_owned(),
                filename: filename.to_owned(),
                total_bytes: None,
            });
        }

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| ServeError::Model(format!("HF Hub API init failed: {e}")))?;
        let repo = api.model(repo_id.to_owned());
        let path = repo
            .get(filename)
            .map_err(|e| ServeError::Model(format!("failed to download {filename}: {e}")))?;

        if let Some(cb) = callback {
            cb(ProgressEvent::DownloadComplete {
                repo_id: repo_id.to_owned(),
                filename: filename.to_owned(),
            });
        }

        Ok(path)
    }

    /// Returns `true` if `filename` is already present in the local hf-hub
    /// cache for `repo_id`, without contacting the network.
    #[must_use]
    pub fn is_file_cached(repo_id: &str, filename: &str) -> bool {
        hf_hub::Cache::default()
            .model(repo_id.to_owned())
            .get(filename)
            .is_some()
    }

    /// The root cache directory this manager was constructed with.
    #[must_use]
    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    /// Remove all downloaded assets under [`cache_dir`](Self::cache_dir).
    ///
    /// Backs the CLI's `clear-cache` command. Safe to call even when the
    /// directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than the
    /// directory being absent.
    pub fn clear_cache(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_file_cached_returns_false_for_nonexistent() {
        assert!(!ModelManager::is_file_cached(
            "nonexistent-org/nonexistent-model-xyz",
            "nonexistent-file.onnx"
        ));
    }

    #[test]
    fn new_creates_cache_dir() {
        let dir = std::env::temp_dir().join(format!("kokoro-serve-test-{}", std::process::id()));
        let manager = ModelManager::new(dir.clone()).expect("manager");
        assert!(dir.exists());
        assert_eq!(manager.cache_dir(), &dir);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clear_cache_is_idempotent_on_missing_dir() {
        let dir = std::env::temp_dir().join(format!("kokoro-serve-test-missing-{}", std::process::id()));
        let manager = ModelManager::new(dir.clone()).expect("manager");
        std::fs::remove_dir_all(&dir).expect("remove once");
        assert!(manager.clear_cache().is_ok());
    }
}
