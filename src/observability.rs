//! Observability: per-request timeline and process-wide metrics.
//!
//! Two complementary surfaces, both write-only from the Streaming Engine's
//! point of view (§9 Design Notes: no cyclic references back into request
//! handling):
//!
//! - [`RequestTimeline`]: an append-only, per-request `(stage, timestamp)`
//!   sequence, aggregated into `ttfa_ms`/`rtf`/`underruns` at
//!   `REQUEST_COMPLETE` and then dropped.
//! - [`Metrics`]: process-wide counters/histograms exported via the
//!   `metrics` facade, rendered for `GET /status` from the same
//!   [`metrics_exporter_prometheus::PrometheusHandle`] used for a
//!   `GET /metrics` scrape endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// One stage in a request's lifecycle, per §3's `RequestTimeline` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The HTTP layer accepted the request body.
    RequestReceived,
    /// Segmentation and pipeline setup began.
    ProcessingStart,
    /// G2P completed for a segment (carries its index).
    G2pComplete(u32),
    /// A backend inference call began for a segment.
    InferenceStart(u32),
    /// A backend inference call completed for a segment.
    InferenceComplete(u32),
    /// A chunk was handed to the HTTP sink for a segment.
    ChunkEmitted(u32),
    /// The request finished (successfully or not).
    RequestComplete,
}

/// Append-only sequence of `(stage, timestamp)` events for one request.
/// Owned by the Streaming Engine for the request's lifetime; handed to
/// [`Metrics::record_request`] at completion and then dropped.
pub struct RequestTimeline {
    events: Vec<(Stage, Instant)>,
}

impl RequestTimeline {
    /// Open a new timeline, immediately recording `RequestReceived`.
    #[must_use]
    pub fn open() -> Self {
        Self {
            events: vec![(Stage::RequestReceived, Instant::now())],
        }
    }

    /// Append `stage` at the current instant.
    pub fn record(&mut self, stage: Stage) {
        self.events.push((stage, Instant::now()));
    }

    /// Time of the first `ChunkEmitted` event relative to `RequestReceived`,
    /// i.e. time-to-first-audio. `None` if no chunk was ever emitted.
    #[must_use]
    pub fn ttfa(&self) -> Option<std::time::Duration> {
        let received = self.events.first()?.1;
        self.events
            .iter()
            .find(|(s, _)| matches!(s, Stage::ChunkEmitted(_)))
            .map(|(_, t)| t.duration_since(received))
    }

    /// Wall-clock span from `RequestReceived` to `RequestComplete` (or the
    /// last recorded event if the request never formally closed).
    #[must_use]
    pub fn total_span(&self) -> std::time::Duration {
        let Some(&(_, start)) = self.events.first() else {
            return std::time::Duration::ZERO;
        };
        let end = self.events.last().map_or(start, |&(_, t)| t);
        end.duration_since(start)
    }

    /// Gaps between consecutive `ChunkEmitted` events that exceed
    /// `threshold` while more chunks were still pending — i.e. underruns.
    #[must_use]
    pub fn underruns(&self, threshold: std::time::Duration) -> u32 {
        let emits: Vec<Instant> = self
            .events
            .iter()
            .filter(|(s, _)| matches!(s, Stage::ChunkEmitted(_)))
            .map(|&(_, t)| t)
            .collect();
        emits
            .windows(2)
            .filter(|w| w[1].duration_since(w[0]) > threshold)
            .count() as u32
    }
}

impl Default for RequestTimeline {
    fn default() -> Self {
        Self::open()
    }
}

/// Process-wide observability surface: Prometheus-backed counters and
/// histograms, plus a render entry point for `GET /status` and
/// `GET /metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global `metrics` recorder (Prometheus exposition
    /// format) and return a handle for rendering snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorder is already installed, or the
    /// builder fails to construct one.
    pub fn install() -> crate::error::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| crate::error::ServeError::Config(format!("metrics init failed: {e}")))?;
        Ok(Self { handle })
    }

    /// Record the aggregated outcome of one completed request:
    /// `ttfa_ms`, `rtf` (audio duration / generation wall time, per
    /// `DESIGN.md`'s Open Question decision using wall-clock span), and
    /// `underruns_total`. `chunk_target_ms` is the configured streaming chunk
    /// target (`spec.md` §4.10); a gap between emitted chunks past 1.5x that
    /// target counts as an underrun.
    pub fn record_request(
        &self,
        timeline: &RequestTimeline,
        audio_duration_secs: f64,
        chunk_target_ms: u64,
    ) {
        if let Some(ttfa) = timeline.ttfa() {
            metrics::histogram!("ttfa_ms").record(ttfa.as_secs_f64() * 1000.0);
        }
        let wall = timeline.total_span().as_secs_f64();
        if wall > 0.0 && audio_duration_secs > 0.0 {
            metrics::histogram!("rtf").record(wall / audio_duration_secs);
        }
        let underrun_threshold = std::time::Duration::from_millis((chunk_target_ms as f64 * 1.5) as u64);
        let underruns = timeline.underruns(underrun_threshold);
        metrics::counter!("underruns_total").increment(u64::from(underruns));
    }

    /// Increment `client_disconnect_total`. Not an error for metrics
    /// purposes — cancellation is the expected outcome of a disconnect.
    pub fn record_client_disconnect(&self) {
        metrics::counter!("client_disconnect_total").increment(1);
    }

    /// Render the current Prometheus text exposition, for `GET /metrics`.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ttfa_is_none_without_a_chunk() {
        let timeline = RequestTimeline::open();
        assert!(timeline.ttfa().is_none());
    }

    #[test]
    fn ttfa_measures_first_chunk_relative_to_received() {
        let mut timeline = RequestTimeline::open();
        std::thread::sleep(Duration::from_millis(5));
        timeline.record(Stage::ChunkEmitted(0));
        let ttfa = timeline.ttfa().expect("ttfa present");
        assert!(ttfa >= Duration::from_millis(5));
    }

    #[test]
    fn underruns_count_gaps_past_threshold() {
        let mut timeline = RequestTimeline::open();
        timeline.record(Stage::ChunkEmitted(0));
        std::thread::sleep(Duration::from_millis(20));
        timeline.record(Stage::ChunkEmitted(1));
        assert_eq!(timeline.underruns(Duration::from_millis(1)), 1);
        assert_eq!(timeline.underruns(Duration::from_secs(1)), 0);
    }

    #[test]
    fn total_span_uses_last_event_when_unclosed() {
        let mut timeline = RequestTimeline::open();
        std::thread::sleep(Duration::from_millis(5));
        timeline.record(Stage::ProcessingStart);
        assert!(timeline.total_span() >= Duration::from_millis(5));
    }
}
