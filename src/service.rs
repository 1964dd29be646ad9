//! Top-level service wiring.
//!
//! [`TtsService`] owns every process-wide collaborator — Model Cache,
//! Multi-Session Manager, G2P Stage, caches, Streaming Engine, metrics,
//! and the Keep-Alive background task — and is constructed exactly once
//! per process. It is threaded explicitly into the HTTP router as shared
//! state rather than reached through an ambient global.

use crate::backend::warmup::WarmupCoordinator;
use crate::cache::inference::InferenceCache;
use crate::cache::primer::PrimerCache;
use crate::capability::{self, Capabilities};
use crate::config::ServeConfig;
use crate::error::Result;
use crate::g2p::G2pStage;
use crate::keepalive::{self, ActivityTracker};
use crate::model_cache::ModelCache;
use crate::models::ModelManager;
use crate::observability::Metrics;
use crate::paths;
use crate::session_manager::SessionManager;
use crate::streaming::StreamingEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns every shared collaborator for the lifetime of the process.
pub struct TtsService {
    /// Effective configuration this service was built from.
    pub config: ServeConfig,
    /// Probed hardware capabilities.
    pub capabilities: Capabilities,
    /// Routes segments to backends and owns backend state.
    pub session_manager: Arc<SessionManager>,
    /// Bounded LRU of fully-encoded primer audio.
    pub primer_cache: Arc<PrimerCache>,
    /// Bounded, TTL'd cache of synthesized segment audio.
    pub inference_cache: Arc<InferenceCache>,
    /// Process-wide metrics surface.
    pub metrics: Arc<Metrics>,
    /// Per-request orchestration.
    pub engine: StreamingEngine,
    keep_alive_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TtsService {
    /// Build and wire every collaborator from `config`. Downloads nothing
    /// eagerly: model assets are fetched lazily on first use of each
    /// backend via the Model Cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cache directory cannot be created, or
    /// if a metrics recorder is already installed in this process.
    pub async fn new(config: ServeConfig) -> Result<Self> {
        paths::ensure_hf_home();

        let capabilities = capability::detect();
        info!(?capabilities, "probed hardware capabilities");

        let model_manager = ModelManager::new(paths::cache_dir().join("models"))?;
        let model_cache = Arc::new(ModelCache::new(
            model_manager,
            config.model.variant.clone(),
            config.model.default_voice.clone(),
        ));
        let warmup = Arc::new(WarmupCoordinator::new());
        let activity = Arc::new(ActivityTracker::new());

        let session_manager = Arc::new(SessionManager::new(
            model_cache,
            warmup,
            capabilities,
            config.backend,
            &config.max_concurrent_per_backend,
            config.segmenter.short_threshold,
            activity.clone(),
        ));

        let g2p = Arc::new(G2pStage::new(config.g2p.clone()));
        let primer_cache = Arc::new(PrimerCache::new(config.primer_cache.capacity));
        let inference_cache = Arc::new(InferenceCache::new(
            config.inference_cache.capacity,
            Duration::from_secs(config.inference_cache.ttl_seconds),
        ));
        let metrics = Arc::new(Metrics::install()?);

        let engine = StreamingEngine::new(
            session_manager.clone(),
            g2p,
            primer_cache.clone(),
            inference_cache.clone(),
            metrics.clone(),
            config.segmenter.clone(),
            config.streaming.clone(),
        );

        let keep_alive_handle = keepalive::spawn(
            session_manager.clone(),
            activity,
            inference_cache.clone(),
            config.keep_alive.clone(),
        );

        Ok(Self {
            config,
            capabilities,
            session_manager,
            primer_cache,
            inference_cache,
            metrics,
            engine,
            keep_alive_handle,
        })
    }
}

impl Drop for TtsService {
    fn drop(&mut self) {
        if let Some(handle) = self.keep_alive_handle.take() {
            handle.abort();
        }
    }
}
