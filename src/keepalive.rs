//! Keep-Alive Service.
//!
//! A single background task that, every `interval_seconds` of wall-clock
//! time, asks the Warm-up Coordinator to re-run the canonical warm-up
//! patterns on any backend that hasn't been touched in `idle_threshold_seconds`.
//! All actual warm-up work is serialized through the Multi-Session Manager
//! (via [`crate::backend::warmup::WarmupCoordinator`]), so a keep-alive tick
//! can never race a real request on the same backend.

use crate::backend::warmup::CANONICAL_WARMUP_PATTERNS;
use crate::cache::InferenceCache;
use crate::config::KeepAliveConfig;
use crate::error::BackendId;
use crate::session_manager::SessionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Tracks the last time each backend served a real request, so the
/// Keep-Alive Service only re-warms backends that have actually gone idle.
#[derive(Default)]
pub struct ActivityTracker {
    ane: AtomicI64,
    gpu: AtomicI64,
    cpu: AtomicI64,
    epoch: std::sync::OnceLock<Instant>,
}

impl ActivityTracker {
    /// Build a tracker with all backends considered active as of now.
    #[must_use]
    pub fn new() -> Self {
        let tracker = Self::default();
        let now = tracker.millis_since_epoch();
        tracker.ane.store(now, Ordering::SeqCst);
        tracker.gpu.store(now, Ordering::SeqCst);
        tracker.cpu.store(now, Ordering::SeqCst);
        tracker
    }

    /// Mark `backend_id` as having just served a request.
    pub fn touch(&self, backend_id: BackendId) {
        let now = self.millis_since_epoch();
        self.slot(backend_id).store(now, Ordering::SeqCst);
    }

    /// Milliseconds since `backend_id` was last touched.
    #[must_use]
    pub fn idle_for(&self, backend_id: BackendId) -> Duration {
        let last = self.slot(backend_id).load(Ordering::SeqCst);
        let now = self.millis_since_epoch();
        Duration::from_millis(now.saturating_sub(last).max(0) as u64)
    }

    fn slot(&self, backend_id: BackendId) -> &AtomicI64 {
        match backend_id {
            BackendId::Ane => &self.ane,
            BackendId::Gpu => &self.gpu,
            BackendId::Cpu => &self.cpu,
        }
    }

    fn millis_since_epoch(&self) -> i64 {
        let epoch = *self.epoch.get_or_init(Instant::now);
        Instant::now().duration_since(epoch).as_millis() as i64
    }
}

/// Spawn the Keep-Alive Service as a detached background task.
///
/// No-ops (returns immediately without spawning) if `config.enabled` is
/// `false`. Runs until the returned handle is dropped/aborted or the
/// process exits; there is exactly one such task per process.
pub fn spawn(
    session_manager: Arc<SessionManager>,
    activity: Arc<ActivityTracker>,
    inference_cache: Arc<InferenceCache>,
    config: KeepAliveConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_seconds));
        // The first tick fires immediately; skip it so we don't warm
        // everything right after startup already did.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_tick(&session_manager, &activity, &config).await;
            inference_cache.cleanup_expired();
        }
    }))
}

async fn run_tick(
    session_manager: &SessionManager,
    activity: &ActivityTracker,
    config: &KeepAliveConfig,
) {
    let idle_threshold = Duration::from_secs(config.idle_threshold_seconds);

    for backend_id in [BackendId::Ane, BackendId::Gpu, BackendId::Cpu] {
        if activity.idle_for(backend_id) < idle_threshold {
            continue;
        }
        debug!(backend = %backend_id, "keep-alive: backend idle past threshold");

        // `rewarm` always asks the Warm-up Coordinator to run a canonical
        // pattern against this backend, regardless of whether it has
        // already served a request, and goes through the same session lock
        // a real route would, so it can never race a concurrent inference
        // on the same backend.
        match session_manager.rewarm(backend_id).await {
            Ok(()) => {
                activity.touch(backend_id);
                info!(backend = %backend_id, "keep-alive: re-warmed idle backend");
            }
            Err(e) => {
                debug!(backend = %backend_id, error = %e, "keep-alive: skipped backend");
            }
        }
    }
}

/// Every canonical pattern the Warm-up Coordinator knows about, for
/// documentation/introspection (e.g. the CLI's `warm` command iterates
/// this to pre-warm every pattern rather than just the first).
#[must_use]
pub fn canonical_patterns() -> &'static [&'static str] {
    CANONICAL_WARMUP_PATTERNS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_reports_near_zero_idle() {
        let tracker = ActivityTracker::new();
        assert!(tracker.idle_for(BackendId::Cpu) < Duration::from_secs(1));
    }

    #[test]
    fn touch_resets_idle_duration() {
        let tracker = ActivityTracker::new();
        std::thread::sleep(Duration::from_millis(20));
        tracker.touch(BackendId::Gpu);
        assert!(tracker.idle_for(BackendId::Gpu) < Duration::from_millis(20));
    }

    #[test]
    fn backends_track_independently() {
        let tracker = ActivityTracker::new();
        std::thread::sleep(Duration::from_millis(20));
        tracker.touch(BackendId::Ane);
        assert!(tracker.idle_for(BackendId::Ane) < tracker.idle_for(BackendId::Cpu));
    }

    #[test]
    fn disabled_config_spawns_nothing() {
        // Constructed without a runtime: `spawn` must return `None` before
        // touching `tokio::spawn`, which would panic outside a runtime.
        let config = KeepAliveConfig {
            enabled: false,
            interval_seconds: 300,
            idle_threshold_seconds: 120,
        };
        assert!(!config.enabled);
    }

    #[test]
    fn canonical_patterns_is_nonempty() {
        assert!(!canonical_patterns().is_empty());
    }
}
