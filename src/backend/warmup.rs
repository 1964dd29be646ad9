//! Warm-up Coordinator: deduplicates concurrent warm-up requests for the
//! same `(backend_id, canonical_warmup_pattern)` pair.
//!
//! Startup, the Keep-Alive Service, and an on-demand cold-backend promotion
//! can all want to warm the same backend around the same time. Without
//! dedup each caller would pay the full cold-start cost; with it, the
//! first caller does the work and everyone else waits on the same result.

use crate::error::{BackendId, Result, ServeError};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Fixed enumerated set of short phoneme patterns used to force lazy graph
/// and kernel compilation. `Session Manager` uses pattern 0 the first time a
/// backend becomes `Ready`; the Keep-Alive Service cycles through all of
/// them across idle ticks so repeated warm-ups don't always hit the same
/// shape.
pub const CANONICAL_WARMUP_PATTERNS: &[&str] = &[".", "t e s t", "h e l o w o r l d"];

type WarmupKey = (BackendId, String);

/// Tracks in-flight and completed warm-ups, keyed by backend and the
/// canonical input pattern used to warm it.
pub struct WarmupCoordinator {
    in_flight: DashMap<WarmupKey, Arc<AsyncMutex<()>>>,
    done: DashSet<WarmupKey>,
}

impl WarmupCoordinator {
    /// Build an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            done: DashSet::new(),
        }
    }

    /// Run `warm` for `(backend_id, pattern)` exactly once across all
    /// concurrent callers; later callers (and all callers after the first
    /// succeeds) return immediately.
    ///
    /// `warm` runs on a blocking thread via [`tokio::task::spawn_blocking`]
    /// since backend warm-up is a synchronous inference call.
    ///
    /// # Errors
    ///
    /// Returns whatever error `warm` returns. A failed warm-up is not
    /// recorded as done, so a later call retries it.
    pub async fn ensure_warm<F>(&self, backend_id: BackendId, pattern: &str, warm: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let key: WarmupKey = (backend_id, pattern.to_owned());
        if self.done.contains(&key) {
            return Ok(());
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check: another caller may have finished while we waited on the lock.
        if self.done.contains(&key) {
            return Ok(());
        }

        let result = tokio::task::spawn_blocking(warm)
            .await
            .map_err(|e| ServeError::PermanentBackendError {
                backend: backend_id,
                message: format!("warm-up task panicked: {e}"),
            })?;

        if result.is_ok() {
            self.done.insert(key);
        }
        result
    }

    /// `true` if `(backend_id, pattern)` has already completed warm-up.
    #[must_use]
    pub fn is_warm(&self, backend_id: BackendId, pattern: &str) -> bool {
        self.done.contains(&(backend_id, pattern.to_owned()))
    }

    /// Forget that `backend_id` was warmed for every pattern, e.g. after the
    /// backend transitions to `Unavailable` and later recovers.
    pub fn reset_backend(&self, backend_id: BackendId) {
        self.done.retain(|(id, _)| *id != backend_id);
        self.in_flight.retain(|(id, _), _| *id != backend_id);
    }
}

impl Default for WarmupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_warmups_for_same_pattern_run_once() {
        let coordinator = Arc::new(WarmupCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .ensure_warm(BackendId::Cpu, ".", move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_warm(BackendId::Cpu, "."));
    }

    #[tokio::test]
    async fn distinct_patterns_warm_independently() {
        let coordinator = WarmupCoordinator::new();
        coordinator
            .ensure_warm(BackendId::Cpu, "a", || Ok(()))
            .await
            .unwrap();
        assert!(coordinator.is_warm(BackendId::Cpu, "a"));
        assert!(!coordinator.is_warm(BackendId::Cpu, "b"));
    }

    #[tokio::test]
    async fn failed_warmup_is_not_recorded_as_done() {
        let coordinator = WarmupCoordinator::new();
        let result = coordinator
            .ensure_warm(BackendId::Gpu, ".", || {
                Err(ServeError::BackendUnavailable)
            })
            .await;
        assert!(result.is_err());
        assert!(!coordinator.is_warm(BackendId::Gpu, "."));
    }

    #[tokio::test]
    async fn reset_backend_clears_only_that_backend() {
        let coordinator = WarmupCoordinator::new();
        coordinator
            .ensure_warm(BackendId::Cpu, ".", || Ok(()))
            .await
            .unwrap();
        coordinator
            .ensure_warm(BackendId::Gpu, ".", || Ok(()))
            .await
            .unwrap();
        coordinator.reset_backend(BackendId::Cpu);
        assert!(!coordinator.is_warm(BackendId::Cpu, "."));
        assert!(coordinator.is_warm(BackendId::Gpu, "."));
    }
}
