//! End-to-end integration tests for the HTTP surface.
//!
//! These exercise the real `axum` router bound to an ephemeral localhost
//! port, driven with `reqwest`, exactly the way a client would see it.
//! `TtsService::new` never downloads or builds a model eagerly — the Model
//! Cache only does that lazily on first backend use — so every test here
//! that doesn't actually synthesize audio runs with no network access and
//! no ONNX runtime involved.
//!
//! `Metrics::install` sets a process-global recorder and errors on a second
//! call, so the whole file shares one service/listener via a `OnceCell`
//! rather than building a fresh `TtsService` per test.

use kokoro_serve::TtsService;
use kokoro_serve::api::router;
use kokoro_serve::config::ServeConfig;
use std::sync::Arc;
use tokio::sync::OnceCell;

static SERVER: OnceCell<String> = OnceCell::const_new();

async fn base_url() -> &'static str {
    SERVER
        .get_or_init(|| async {
            // SAFETY: single-threaded init path (`OnceCell`), set before any
            // other test reads `paths::cache_dir()`.
            unsafe {
                std::env::set_var(
                    "KOKORO_TTS_CACHE_DIR",
                    std::env::temp_dir().join("kokoro-serve-test-cache"),
                );
            }

            let mut config = ServeConfig::default();
            config.keep_alive.enabled = false;

            let service = Arc::new(
                TtsService::new(config)
                    .await
                    .expect("service wiring must not require network access"),
            );
            let app = router(service);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind ephemeral port");
            let addr = listener.local_addr().expect("local addr");

            tokio::spawn(async move {
                axum::serve(listener, app).await.ok();
            });

            format!("http://{addr}")
        })
        .await
}

#[tokio::test]
async fn health_reports_ready_without_any_request() {
    let base = base_url().await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ready"], serde_json::json!(true));
}

#[tokio::test]
async fn status_reports_all_three_backends_uninitialized() {
    let base = base_url().await;
    let resp = reqwest::get(format!("{base}/status")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 3);
    for entry in backends {
        assert_eq!(entry["state"], serde_json::json!("uninitialized"));
        assert_eq!(entry["in_flight"], serde_json::json!(0));
    }
    assert_eq!(body["primer_cache_len"], serde_json::json!(0));
    assert_eq!(body["inference_cache_len"], serde_json::json!(0));
}

#[tokio::test]
async fn voices_lists_known_identifiers() {
    let base = base_url().await;
    let resp = reqwest::get(format!("{base}/voices")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let voices = body["voices"].as_array().unwrap();
    assert!(voices.iter().any(|v| v == "af_heart"));
    assert!(voices.len() >= 10);
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let base = base_url().await;
    let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    // No request has completed yet; the exposition is still valid text
    // even with no samples recorded.
    let body = resp.text().await.unwrap();
    assert!(body.is_empty() || body.contains('#') || body.contains('\n'));
}

#[tokio::test]
async fn speech_rejects_empty_input_before_touching_any_backend() {
    let base = base_url().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/audio/speech"))
        .json(&serde_json::json!({"input": "   ", "voice": "af_heart"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], serde_json::json!("invalid_request"));
}

#[tokio::test]
async fn speech_rejects_unknown_voice() {
    let base = base_url().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/audio/speech"))
        .json(&serde_json::json!({"input": "hello there", "voice": "nope_nobody"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], serde_json::json!("invalid_request"));
}

#[tokio::test]
async fn speech_rejects_speed_outside_accepted_range() {
    let base = base_url().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/v1/audio/speech"))
        .json(&serde_json::json!({
            "input": "hello there",
            "voice": "af_heart",
            "speed": 9.9,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn speech_rejects_text_over_the_configured_limit() {
    let base = base_url().await;
    let client = reqwest::Client::new();
    let long_text = "a".repeat(20_000);
    let resp = client
        .post(format!("{base}/v1/audio/speech"))
        .json(&serde_json::json!({"input": long_text, "voice": "af_heart"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 413);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], serde_json::json!("text_too_long"));
}
