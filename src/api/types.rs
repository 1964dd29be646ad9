//! HTTP request/response contract for `POST /v1/audio/speech` and the
//! supporting introspection endpoints.

use crate::error::BackendId;
use crate::session_manager::BackendState;
use serde::{Deserialize, Serialize};

/// Audio container/encoding requested for a synthesis response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// 16-bit PCM framed in a RIFF/WAVE container (default).
    Wav,
    /// MPEG Layer III. Not bundled in this build; see `streaming::container`.
    Mp3,
    /// Free Lossless Audio Codec. Not bundled in this build.
    Flac,
    /// Raw 16-bit little-endian PCM with no container.
    Pcm,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self::Wav
    }
}

fn default_speed() -> f32 {
    1.0
}

fn default_language() -> String {
    "en".to_owned()
}

fn default_model() -> String {
    "kokoro".to_owned()
}

/// `POST /v1/audio/speech` request body, per the OpenAI-shaped audio
/// speech contract this endpoint mirrors.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechRequest {
    /// Model identifier; accepted but unused beyond validation (this
    /// deployment always serves the one configured Kokoro variant).
    #[serde(default = "default_model")]
    pub model: String,
    /// Text to synthesize.
    pub input: String,
    /// Requested voice identifier.
    pub voice: String,
    /// Output container/encoding.
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Playback speed multiplier, `0.5..=2.0`.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Whether to return a chunked stream instead of a single body.
    #[serde(default)]
    pub stream: bool,
    /// BCP-47-like language tag, canonicalized by the G2P stage.
    #[serde(default = "default_language")]
    pub language: String,
}

/// Error body returned for any non-2xx response from this API.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error kind, e.g. `"invalid_request"`,
    /// `"text_too_long"`, `"backend_unavailable"`, `"synthesis_failed"`.
    #[serde(rename = "type")]
    pub error_type: String,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: &'static str,
    /// Whether the service can currently accept requests (CPU is Ready).
    pub ready: bool,
}

/// `GET /status` response: a point-in-time snapshot of routing state, cache
/// occupancy and probed capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Per-backend state.
    pub backends: Vec<BackendStatus>,
    /// Primer cache occupancy.
    pub primer_cache_len: usize,
    /// Inference cache occupancy.
    pub inference_cache_len: usize,
    /// Probed hardware capabilities.
    pub capabilities: crate::capability::Capabilities,
}

/// Per-backend entry in [`StatusResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    /// Which backend this entry describes.
    pub backend: BackendId,
    /// Current state machine position.
    pub state: BackendStateView,
    /// Current in-flight inference count.
    pub in_flight: u32,
}

/// Serializable mirror of [`BackendState`] (the internal enum has no
/// `Serialize` derive since it's not part of any wire format elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStateView {
    Uninitialized,
    Initializing,
    Ready,
    InUse,
    Degraded,
    Unavailable,
}

impl From<BackendState> for BackendStateView {
    fn from(state: BackendState) -> Self {
        match state {
            BackendState::Uninitialized => Self::Uninitialized,
            BackendState::Initializing => Self::Initializing,
            BackendState::Ready => Self::Ready,
            BackendState::InUse => Self::InUse,
            BackendState::Degraded => Self::Degraded,
            BackendState::Unavailable => Self::Unavailable,
        }
    }
}

/// `GET /voices` response.
#[derive(Debug, Clone, Serialize)]
pub struct VoicesResponse {
    /// Recognized voice identifiers.
    pub voices: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_format_defaults_to_wav() {
        assert_eq!(ResponseFormat::default(), ResponseFormat::Wav);
    }

    #[test]
    fn response_format_deserializes_lowercase() {
        let fmt: ResponseFormat = serde_json::from_str("\"mp3\"").unwrap();
        assert_eq!(fmt, ResponseFormat::Mp3);
    }

    #[test]
    fn speech_request_applies_defaults() {
        let json = r#"{"input":"hi","voice":"af_heart"}"#;
        let req: SpeechRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.model, "kokoro");
        assert_eq!(req.response_format, ResponseFormat::Wav);
        assert!((req.speed - 1.0).abs() < f32::EPSILON);
        assert!(!req.stream);
        assert_eq!(req.language, "en");
    }

    #[test]
    fn backend_state_view_maps_every_variant() {
        assert_eq!(
            BackendStateView::from(BackendState::Ready),
            BackendStateView::Ready
        );
        assert_eq!(
            BackendStateView::from(BackendState::Unavailable),
            BackendStateView::Unavailable
        );
    }
}
