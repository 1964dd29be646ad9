//! Route handlers for the Public API surface.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::types::{
    BackendStatus, ErrorBody, HealthResponse, ResponseFormat, SpeechRequest, StatusResponse,
    VoicesResponse,
};
use crate::error::{BackendId, ServeError};
use crate::model_cache::KNOWN_VOICES;
use crate::service::TtsService;
use crate::session_manager::BackendState;
use crate::streaming::{SynthesisRequest, container};

/// Shared state every handler receives.
pub type AppState = Arc<TtsService>;

/// `POST /v1/audio/speech`.
pub async fn speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Response {
    if let Err(e) = validate(&request, state.config.max_text_len) {
        return error_response(&e);
    }

    let synth_request = SynthesisRequest {
        request_id: Uuid::new_v4().to_string(),
        text: request.input,
        voice: request.voice,
        speed: request.speed,
        language: request.language,
        format: request.response_format,
    };

    if request.stream {
        stream_response(state, synth_request).await
    } else {
        buffered_response(state, synth_request).await
    }
}

/// Validate a [`SpeechRequest`] before it enters the pipeline.
fn validate(request: &SpeechRequest, max_text_len: usize) -> crate::error::Result<()> {
    if request.input.trim().is_empty() {
        return Err(ServeError::InputError("input text must not be empty".to_owned()));
    }
    let actual = request.input.chars().count();
    if actual > max_text_len {
        return Err(ServeError::TextTooLong {
            max: max_text_len,
            actual,
        });
    }
    if !KNOWN_VOICES.contains(&request.voice.as_str()) {
        return Err(ServeError::InputError(format!(
            "unknown voice {:?}",
            request.voice
        )));
    }
    if !(0.5..=2.0).contains(&request.speed) {
        return Err(ServeError::InputError(format!(
            "speed {} outside accepted range 0.5..=2.0",
            request.speed
        )));
    }
    Ok(())
}

async fn buffered_response(state: AppState, request: SynthesisRequest) -> Response {
    let format = request.format;
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let engine = state.engine.clone();

    let run_handle = tokio::spawn(async move { engine.run(request, tx).await });

    let mut body = Vec::new();
    while let Some(chunk) = rx.recv().await {
        body.extend_from_slice(&chunk.bytes);
    }

    match run_handle.await {
        Ok(Ok(())) if body.is_empty() => {
            return error_response(&ServeError::SynthesisFailed {
                segment_index: 0,
                reason: "no audio produced".to_owned(),
            });
        }
        Ok(Ok(())) => {}
        Ok(Err(e)) => return error_response(&e),
        Err(e) => {
            error!(error = %e, "synthesis task panicked");
            return error_response(&ServeError::SynthesisFailed {
                segment_index: 0,
                reason: "internal error".to_owned(),
            });
        }
    }

    let framed = if matches!(format, ResponseFormat::Wav) {
        let mut framed = Vec::with_capacity(body.len() + 44);
        framed.extend_from_slice(&container::wav_header(body.len() as u32));
        framed.extend_from_slice(&body);
        framed
    } else {
        body
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, container::content_type(format))
        .body(Body::from(framed))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn stream_response(state: AppState, request: SynthesisRequest) -> Response {
    let format = request.format;
    let request_id = request.request_id.clone();
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let engine = state.engine.clone();

    tokio::spawn(async move {
        if let Err(e) = engine.run(request, tx).await {
            info!(request_id = %request_id, error = %e, "streamed request ended with an error");
        }
    });

    let header_chunk = if matches!(format, ResponseFormat::Wav) {
        Some(container::streaming_header().to_vec())
    } else {
        None
    };

    let byte_stream = ReceiverStream::new(rx).map(move |chunk| Ok::<_, std::io::Error>(chunk.bytes.into()));
    let body = if let Some(header) = header_chunk {
        let prefix = futures::stream::once(async move { Ok::<_, std::io::Error>(header.into()) });
        Body::from_stream(prefix.chain(byte_stream))
    } else {
        Body::from_stream(byte_stream)
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, container::content_type(format))
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cpu_ready = !matches!(
        state.session_manager.state_of(BackendId::Cpu),
        BackendState::Unavailable
    );
    let any_degraded = [BackendId::Ane, BackendId::Gpu, BackendId::Cpu]
        .into_iter()
        .any(|b| matches!(state.session_manager.state_of(b), BackendState::Unavailable));

    Json(HealthResponse {
        status: if !cpu_ready {
            "down"
        } else if any_degraded {
            "degraded"
        } else {
            "ok"
        },
        ready: cpu_ready,
    })
}

/// `GET /status`.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let backends = [BackendId::Ane, BackendId::Gpu, BackendId::Cpu]
        .into_iter()
        .map(|backend| BackendStatus {
            backend,
            state: state.session_manager.state_of(backend).into(),
            in_flight: state.session_manager.in_flight(backend),
        })
        .collect();

    Json(StatusResponse {
        backends,
        primer_cache_len: state.primer_cache.len(),
        inference_cache_len: state.inference_cache.len(),
        capabilities: state.capabilities,
    })
}

/// `GET /voices`.
pub async fn voices() -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: KNOWN_VOICES.to_vec(),
    })
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

fn error_response(err: &ServeError) -> Response {
    let (status, error_type) = status_for(err);
    let body = ErrorBody {
        message: err.to_string(),
        error_type: error_type.to_owned(),
    };
    (status, Json(body)).into_response()
}

fn status_for(err: &ServeError) -> (StatusCode, &'static str) {
    match err {
        ServeError::InputError(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        ServeError::TextTooLong { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "text_too_long"),
        ServeError::CapacityExceeded(_) => (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded"),
        ServeError::BackendUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable"),
        ServeError::SynthesisFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "synthesis_failed"),
        ServeError::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}
