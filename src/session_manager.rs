//! Multi-Session Manager.
//!
//! Routes a segment to the best available backend, enforces per-backend
//! concurrency limits, and owns the per-backend state machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> InUse
//!                                    |
//!                                    v
//!                                 Degraded -> Unavailable
//! ```
//!
//! `Unavailable -> Ready` only happens via [`SessionManager::reopen`], never
//! automatically — see the `DESIGN.md` Open Question decision.

use crate::backend::warmup::{CANONICAL_WARMUP_PATTERNS, WarmupCoordinator};
use crate::backend::{Backend, BackendCapabilities};
use crate::capability::Capabilities;
use crate::config::{BackendSelection, MaxConcurrentPerBackend};
use crate::error::{BackendId, Result, ServeError};
use crate::g2p::Phonemes;
use crate::keepalive::ActivityTracker;
use crate::model_cache::{ModelCache, SharedBackend};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Bounded backoff window before the same-backend retry in
/// [`SessionManager::try_backend`], per §4.5 rule 4: a fixed floor plus
/// jitter so a burst of simultaneously-retrying requests doesn't hammer the
/// same backend in lockstep.
const RETRY_BACKOFF_FLOOR_MS: u64 = 20;
const RETRY_BACKOFF_JITTER_MS: u64 = 30;

/// A backend's place in the state machine described in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// No `get_or_init` has been attempted yet.
    Uninitialized,
    /// A model build/warm-up is in flight.
    Initializing,
    /// Warmed and idle; eligible for routing.
    Ready,
    /// At least one inference is currently in flight (informational; the
    /// semaphore is the actual concurrency gate).
    InUse,
    /// Degraded after transient failures; still eligible for routing but
    /// one more permanent/repeated-transient failure blacklists it.
    Degraded,
    /// Blacklisted; never routed to until [`SessionManager::reopen`].
    Unavailable,
}

/// How many consecutive transient failures move a backend `Ready -> Degraded`
/// and then `Degraded -> Unavailable`.
const TRANSIENT_FAILURE_THRESHOLD: u32 = 3;

struct BackendEntry {
    state: std::sync::RwLock<BackendState>,
    in_flight: AtomicU32,
    consecutive_transients: AtomicU32,
    semaphore: Arc<Semaphore>,
    warmup_pattern_idx: AtomicUsize,
}

/// Routes segments to backends, enforces concurrency, and owns backend
/// state transitions. The sole mutator of per-backend state; callers only
/// ever interact through [`acquire_route`](Self::acquire_route) or the
/// higher-level [`run_segment`](Self::run_segment).
pub struct SessionManager {
    model_cache: Arc<ModelCache>,
    warmup: Arc<WarmupCoordinator>,
    capabilities: Capabilities,
    backend_selection: BackendSelection,
    short_threshold: usize,
    entries: DashMap<BackendId, BackendEntry>,
    activity: Arc<ActivityTracker>,
}

/// A pinned assignment of a segment to a backend, valid only for the
/// segment it was issued for. Releases its concurrency permit and demotes
/// `InUse -> Ready` on drop.
pub struct RouteGuard<'a> {
    manager: &'a SessionManager,
    backend_id: BackendId,
    backend: SharedBackend,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl RouteGuard<'_> {
    /// Which backend this route was pinned to.
    #[must_use]
    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        self.manager.mark_idle(self.backend_id);
    }
}

impl SessionManager {
    /// Build a manager over `model_cache`, with concurrency caps from
    /// `limits` and routing policy from `backend_selection`/`capabilities`.
    #[must_use]
    pub fn new(
        model_cache: Arc<ModelCache>,
        warmup: Arc<WarmupCoordinator>,
        capabilities: Capabilities,
        backend_selection: BackendSelection,
        limits: &MaxConcurrentPerBackend,
        short_threshold: usize,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        let entries = DashMap::new();
        entries.insert(BackendId::Ane, BackendEntry::new(limits.ane.max(1)));
        entries.insert(BackendId::Gpu, BackendEntry::new(limits.gpu.max(1)));
        entries.insert(BackendId::Cpu, BackendEntry::new(limits.cpu.max(1)));

        Self {
            model_cache,
            warmup,
            capabilities,
            backend_selection,
            short_threshold,
            entries,
            activity,
        }
    }

    /// Current state of `backend_id`.
    #[must_use]
    pub fn state_of(&self, backend_id: BackendId) -> BackendState {
        self.entries
            .get(&backend_id)
            .map(|e| *e.state.read().unwrap_or_else(|p| p.into_inner()))
            .unwrap_or(BackendState::Uninitialized)
    }

    /// Operator-triggered recovery: move `backend_id` back to `Ready` from
    /// `Unavailable` (or `Degraded`), resetting its failure counter and
    /// warm-up record. Per `DESIGN.md`, this is the *only* path back to
    /// `Ready` once a backend has been blacklisted — there is no automatic
    /// recovery.
    pub fn reopen(&self, backend_id: BackendId) {
        if let Some(entry) = self.entries.get(&backend_id) {
            entry.set_state(BackendState::Uninitialized);
            entry.consecutive_transients.store(0, Ordering::SeqCst);
        }
        self.model_cache.drop_backend(backend_id);
        self.warmup.reset_backend(backend_id);
        info!(backend = %backend_id, "backend reopened for routing");
    }

    /// Compute the ordered candidate list for a segment of `char_len`,
    /// honoring the configured backend selection policy and probed
    /// capabilities. First match wins; CPU is always last and never
    /// excluded (it has no further fallback).
    fn candidates(&self, char_len: usize) -> Vec<BackendId> {
        match self.backend_selection {
            BackendSelection::Ane => vec![BackendId::Ane],
            BackendSelection::Gpu => vec![BackendId::Gpu],
            BackendSelection::Cpu => vec![BackendId::Cpu],
            BackendSelection::AneThenCpu => vec![BackendId::Ane, BackendId::Cpu],
            BackendSelection::Auto => {
                let mut order = Vec::with_capacity(3);
                if char_len <= self.short_threshold && self.capabilities.has_ane {
                    order.push(BackendId::Ane);
                }
                if self.capabilities.has_gpu {
                    order.push(BackendId::Gpu);
                }
                order.push(BackendId::Cpu);
                order
            }
        }
    }

    /// Acquire a [`RouteGuard`] for a segment of `char_len` characters,
    /// following the routing policy in §4.5. Awaits if the chosen
    /// backend's concurrency limit is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::BackendUnavailable`] if every candidate
    /// backend is `Unavailable`, or a model/backend construction error if
    /// `get_or_init` fails.
    pub async fn acquire_route(&self, char_len: usize) -> Result<RouteGuard<'_>> {
        let candidates = self.candidates(char_len);
        let mut last_err = None;
        for backend_id in candidates {
            if self.state_of(backend_id) == BackendState::Unavailable {
                continue;
            }
            match self.acquire_specific(backend_id).await {
                Ok(guard) => return Ok(guard),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ServeError::BackendUnavailable))
    }

    /// Acquire a route pinned to exactly `backend_id`, bypassing the
    /// routing policy (used for same-backend retry after a transient
    /// failure, per §4.5 rule 4).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be obtained from the Model
    /// Cache.
    pub async fn acquire_specific(&self, backend_id: BackendId) -> Result<RouteGuard<'_>> {
        let entry = self
            .entries
            .get(&backend_id)
            .ok_or(ServeError::BackendUnavailable)?;
        let semaphore = entry.semaphore.clone();
        drop(entry);

        let was_uninitialized = self.state_of(backend_id) == BackendState::Uninitialized;
        if was_uninitialized {
            self.set_state(backend_id, BackendState::Initializing);
        }

        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| ServeError::BackendUnavailable)?;

        let backend = self.model_cache.get_or_init(backend_id).await?;

        if was_uninitialized {
            self.warm_up(backend_id, &backend).await?;
        }
        self.mark_in_use(backend_id);

        Ok(RouteGuard {
            manager: self,
            backend_id,
            backend,
            _permit: permit,
        })
    }

    async fn warm_up(&self, backend_id: BackendId, backend: &SharedBackend) -> Result<()> {
        let pattern = CANONICAL_WARMUP_PATTERNS[0].to_owned();
        let backend = backend.clone();
        let result = self
            .warmup
            .ensure_warm(backend_id, &pattern, move || {
                // `try_lock` never contends here: this runs before the
                // route's own permit is handed out to a caller.
                let mut guard = backend
                    .try_lock()
                    .map_err(|_| ServeError::BackendUnavailable)?;
                guard.warmup()
            })
            .await;

        match &result {
            Ok(()) => self.set_state(backend_id, BackendState::Ready),
            Err(_) => self.set_state(backend_id, BackendState::Degraded),
        }
        result
    }

    /// Force a real warm-up inference on `backend_id` regardless of its
    /// current state, for the Keep-Alive Service (§4.12). Unlike
    /// [`acquire_specific`](Self::acquire_specific), which only warms a
    /// backend the first time it leaves `Uninitialized`, this always asks
    /// the Warm-up Coordinator to run one, cycling through
    /// `CANONICAL_WARMUP_PATTERNS` across calls so a backend the coordinator
    /// already marked done for pattern 0 still gets exercised again rather
    /// than short-circuiting forever.
    ///
    /// Never touches an `Unavailable` backend — recovery from that state is
    /// operator-only. Uses the session's `try_lock`, same as the initial
    /// warm-up, so it can never race a real in-flight inference: if one is
    /// in progress this simply skips the tick.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::BackendUnavailable`] if the backend is
    /// `Unavailable` or its session is currently locked by a real request,
    /// or whatever error the Model Cache/warm-up inference itself produces.
    pub async fn rewarm(&self, backend_id: BackendId) -> Result<()> {
        if self.state_of(backend_id) == BackendState::Unavailable {
            return Err(ServeError::BackendUnavailable);
        }

        let pattern = self.next_warmup_pattern(backend_id);
        let backend = self.model_cache.get_or_init(backend_id).await?;
        let backend_clone = backend.clone();
        let result = self
            .warmup
            .ensure_warm(backend_id, pattern, move || {
                let mut guard = backend_clone
                    .try_lock()
                    .map_err(|_| ServeError::BackendUnavailable)?;
                guard.warmup()
            })
            .await;

        match &result {
            Ok(()) if self.state_of(backend_id) == BackendState::Uninitialized => {
                self.set_state(backend_id, BackendState::Ready);
            }
            Err(_) if self.state_of(backend_id) == BackendState::Uninitialized => {
                self.set_state(backend_id, BackendState::Degraded);
            }
            _ => {}
        }
        result
    }

    /// Next pattern in `CANONICAL_WARMUP_PATTERNS` for `backend_id`, cycling
    /// on each call. Used only by [`rewarm`](Self::rewarm).
    fn next_warmup_pattern(&self, backend_id: BackendId) -> &'static str {
        self.entries
            .get(&backend_id)
            .map(|e| {
                let idx = e.warmup_pattern_idx.fetch_add(1, Ordering::SeqCst);
                CANONICAL_WARMUP_PATTERNS[idx % CANONICAL_WARMUP_PATTERNS.len()]
            })
            .unwrap_or(CANONICAL_WARMUP_PATTERNS[0])
    }

    fn mark_in_use(&self, backend_id: BackendId) {
        if let Some(entry) = self.entries.get(&backend_id) {
            entry.in_flight.fetch_add(1, Ordering::SeqCst);
            let current = *entry.state.read().unwrap_or_else(|p| p.into_inner());
            if current == BackendState::Ready {
                entry.set_state(BackendState::InUse);
            }
        }
    }

    fn mark_idle(&self, backend_id: BackendId) {
        if let Some(entry) = self.entries.get(&backend_id) {
            let remaining = entry.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            let current = *entry.state.read().unwrap_or_else(|p| p.into_inner());
            if remaining == 0 && current == BackendState::InUse {
                entry.set_state(BackendState::Ready);
            }
        }
    }

    fn set_state(&self, backend_id: BackendId, state: BackendState) {
        if let Some(entry) = self.entries.get(&backend_id) {
            entry.set_state(state);
        }
    }

    /// Current number of in-flight inferences on `backend_id`.
    #[must_use]
    pub fn in_flight(&self, backend_id: BackendId) -> u32 {
        self.entries
            .get(&backend_id)
            .map(|e| e.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn backend_capabilities(&self, backend_id: BackendId) -> BackendCapabilities {
        match backend_id {
            BackendId::Cpu => BackendCapabilities {
                supports_concurrent: true,
                max_input_len: crate::backend::kokoro::MAX_CONTEXT,
            },
            BackendId::Ane | BackendId::Gpu => BackendCapabilities {
                supports_concurrent: backend_id == BackendId::Gpu,
                max_input_len: crate::backend::kokoro::MAX_CONTEXT,
            },
        }
    }

    /// Record a [`ServeError::TransientBackendError`] against `backend_id`:
    /// increments `backend_transient_total`, and after
    /// [`TRANSIENT_FAILURE_THRESHOLD`] consecutive transient failures,
    /// demotes the backend to `Degraded`.
    pub fn record_transient(&self, backend_id: BackendId) {
        metrics::counter!("backend_transient_total", "backend" => backend_id.to_string())
            .increment(1);
        if let Some(entry) = self.entries.get(&backend_id) {
            let count = entry.consecutive_transients.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= TRANSIENT_FAILURE_THRESHOLD {
                entry.set_state(BackendState::Degraded);
                warn!(backend = %backend_id, count, "backend demoted to degraded");
            }
        }
    }

    /// Record a [`ServeError::PermanentBackendError`] against `backend_id`:
    /// increments `backend_permanent_total` and blacklists it immediately.
    pub fn record_permanent(&self, backend_id: BackendId) {
        metrics::counter!("backend_permanent_total", "backend" => backend_id.to_string())
            .increment(1);
        self.set_state(backend_id, BackendState::Unavailable);
        warn!(backend = %backend_id, "backend marked unavailable");
    }

    /// Record a successful inference: resets the consecutive-transient
    /// counter (a later failure starts counting from zero again).
    pub fn record_success(&self, backend_id: BackendId) {
        if let Some(entry) = self.entries.get(&backend_id) {
            entry.consecutive_transients.store(0, Ordering::SeqCst);
        }
        self.activity.touch(backend_id);
    }

    /// Run one segment end to end: route, execute, retry once on the same
    /// backend on a transient failure, then fall back per §4.5 rule 4.
    /// CPU never falls back further; a CPU failure terminates the segment.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::SynthesisFailed`] if every candidate (and its
    /// one retry) fails.
    pub async fn run_segment(
        &self,
        phonemes: &Phonemes,
        voice_id: &str,
        speed: f32,
        char_len: usize,
    ) -> Result<crate::audio::AudioBuffer> {
        let candidates = self.candidates(char_len);
        let mut last_reason = String::new();

        for backend_id in candidates {
            if self.state_of(backend_id) == BackendState::Unavailable {
                continue;
            }

            match self.try_backend(backend_id, phonemes, voice_id, speed).await {
                Ok(audio) => return Ok(audio),
                Err(ServeError::InputTooLong { .. }) if backend_id != BackendId::Cpu => {
                    // Too long for this backend's context window; try the
                    // next candidate rather than treating it as a failure.
                    continue;
                }
                Err(e) => {
                    last_reason = e.to_string();
                    if backend_id == BackendId::Cpu {
                        break;
                    }
                }
            }
        }

        Err(ServeError::SynthesisFailed {
            segment_index: 0,
            reason: last_reason,
        })
    }

    /// Try `backend_id` once, then once more on a transient failure,
    /// applying state transitions as failures occur.
    async fn try_backend(
        &self,
        backend_id: BackendId,
        phonemes: &Phonemes,
        voice_id: &str,
        speed: f32,
    ) -> Result<crate::audio::AudioBuffer> {
        for attempt in 0..2u8 {
            let guard = self.acquire_specific(backend_id).await?;
            let result = run_on_route(&guard, phonemes, voice_id, speed).await;
            drop(guard);

            match result {
                Ok(audio) => {
                    self.record_success(backend_id);
                    return Ok(audio);
                }
                Err(ServeError::TransientBackendError { .. }) if attempt == 0 => {
                    self.record_transient(backend_id);
                    tokio::time::sleep(retry_backoff_delay()).await;
                    continue;
                }
                Err(ServeError::TransientBackendError { .. }) => {
                    self.record_transient(backend_id);
                    return Err(ServeError::SynthesisFailed {
                        segment_index: 0,
                        reason: format!("{backend_id} exhausted its retry"),
                    });
                }
                Err(ServeError::PermanentBackendError { .. }) => {
                    self.record_permanent(backend_id);
                    return Err(ServeError::SynthesisFailed {
                        segment_index: 0,
                        reason: format!("{backend_id} permanently failed"),
                    });
                }
                Err(other) => return Err(other),
            }
        }
        unreachable!("loop always returns within two attempts")
    }
}

impl BackendEntry {
    fn new(permits: usize) -> Self {
        Self {
            state: std::sync::RwLock::new(BackendState::Uninitialized),
            in_flight: AtomicU32::new(0),
            consecutive_transients: AtomicU32::new(0),
            semaphore: Arc::new(Semaphore::new(permits)),
            warmup_pattern_idx: AtomicUsize::new(0),
        }
    }

    fn set_state(&self, state: BackendState) {
        let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
        *guard = state;
    }
}

/// A bounded, jittered delay for the same-backend retry in §4.5 rule 4.
fn retry_backoff_delay() -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=RETRY_BACKOFF_JITTER_MS);
    Duration::from_millis(RETRY_BACKOFF_FLOOR_MS + jitter)
}

/// Run `phonemes` on the backend pinned by `guard`.
///
/// The session's ONNX call is synchronous and compute-bound; it runs on a
/// dedicated blocking-pool thread via [`tokio::task::spawn_blocking`],
/// generalizing the teacher's `KokoroTts::synthesize` blocking-call
/// convention to one worker pool per backend (gated by that backend's
/// semaphore permit) instead of mixing the blocking call directly into the
/// cooperative task with `block_in_place`.
///
/// # Errors
///
/// Propagates whatever [`crate::backend::Backend::run`] returns, or
/// [`ServeError::PermanentBackendError`] if the blocking task itself panics.
pub async fn run_on_route(
    guard: &RouteGuard<'_>,
    phonemes: &Phonemes,
    voice_id: &str,
    speed: f32,
) -> Result<crate::audio::AudioBuffer> {
    let backend_id = guard.backend_id();
    let backend = guard.backend.clone();
    let phonemes = phonemes.clone();
    let voice_id = voice_id.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut backend = backend.blocking_lock();
        backend.run(&phonemes, &voice_id, speed)
    })
    .await
    .map_err(|e| ServeError::PermanentBackendError {
        backend: backend_id,
        message: format!("inference task panicked: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> MaxConcurrentPerBackend {
        MaxConcurrentPerBackend {
            ane: 1,
            gpu: 2,
            cpu: 4,
        }
    }

    fn manager_no_accelerators() -> SessionManager {
        let model_cache = Arc::new(ModelCache::new(
            crate::models::ModelManager::new(std::env::temp_dir().join("kokoro-sm-test")).unwrap(),
            "q8".to_owned(),
            "af_heart".to_owned(),
        ));
        SessionManager::new(
            model_cache,
            Arc::new(WarmupCoordinator::new()),
            Capabilities {
                has_ane: false,
                has_gpu: false,
                cpu_cores: 4,
                total_ram_bytes: None,
            },
            BackendSelection::Auto,
            &limits(),
            150,
            Arc::new(ActivityTracker::new()),
        )
    }

    #[test]
    fn candidates_fall_back_to_cpu_without_accelerators() {
        let manager = manager_no_accelerators();
        assert_eq!(manager.candidates(10), vec![BackendId::Cpu]);
        assert_eq!(manager.candidates(10_000), vec![BackendId::Cpu]);
    }

    #[test]
    fn candidates_prefer_ane_for_short_segments() {
        let mut manager = manager_no_accelerators();
        manager.capabilities.has_ane = true;
        assert_eq!(
            manager.candidates(10),
            vec![BackendId::Ane, BackendId::Cpu]
        );
        // Long segments skip ANE even when available.
        assert_eq!(manager.candidates(10_000), vec![BackendId::Cpu]);
    }

    #[test]
    fn forced_selection_ignores_capabilities() {
        let mut manager = manager_no_accelerators();
        manager.backend_selection = BackendSelection::Gpu;
        assert_eq!(manager.candidates(10), vec![BackendId::Gpu]);
    }

    #[test]
    fn new_backend_starts_uninitialized() {
        let manager = manager_no_accelerators();
        assert_eq!(manager.state_of(BackendId::Cpu), BackendState::Uninitialized);
    }

    #[test]
    fn reopen_resets_unavailable_backend() {
        let manager = manager_no_accelerators();
        manager.record_permanent(BackendId::Cpu);
        assert_eq!(manager.state_of(BackendId::Cpu), BackendState::Unavailable);
        manager.reopen(BackendId::Cpu);
        assert_eq!(manager.state_of(BackendId::Cpu), BackendState::Uninitialized);
    }

    #[test]
    fn repeated_transients_demote_to_degraded() {
        let manager = manager_no_accelerators();
        for _ in 0..TRANSIENT_FAILURE_THRESHOLD {
            manager.record_transient(BackendId::Cpu);
        }
        assert_eq!(manager.state_of(BackendId::Cpu), BackendState::Degraded);
    }

    #[test]
    fn success_resets_transient_counter() {
        let manager = manager_no_accelerators();
        manager.record_transient(BackendId::Cpu);
        manager.record_transient(BackendId::Cpu);
        manager.record_success(BackendId::Cpu);
        for _ in 0..(TRANSIENT_FAILURE_THRESHOLD - 1) {
            manager.record_transient(BackendId::Cpu);
        }
        assert_ne!(manager.state_of(BackendId::Cpu), BackendState::Degraded);
    }

    #[test]
    fn in_flight_starts_at_zero() {
        let manager = manager_no_accelerators();
        assert_eq!(manager.in_flight(BackendId::Cpu), 0);
    }

    #[test]
    fn capabilities_report_expected_concurrency_profile() {
        let manager = manager_no_accelerators();
        assert!(!manager.backend_capabilities(BackendId::Ane).supports_concurrent);
        assert!(manager.backend_capabilities(BackendId::Gpu).supports_concurrent);
        assert!(manager.backend_capabilities(BackendId::Cpu).supports_concurrent);
    }
}
