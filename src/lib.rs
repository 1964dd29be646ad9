//! kokoro-serve: low-latency text-to-speech serving engine.
//!
//! Wraps a Kokoro-82M-class ONNX acoustic model and serves it over an HTTP
//! API, returning synthesized audio as a single payload or as an ordered
//! chunked stream. The serving runtime is the request pipeline from
//! accepted text to streamed audio bytes:
//!
//! ```text
//! HTTP layer -> Public API -> Text Segmenter -> Streaming Engine
//!   -> (per segment) Primer/Inference Cache -> G2P Stage
//!   -> Multi-Session Manager -> Inference Backend Adapter
//! ```
//!
//! # Module map
//!
//! - [`capability`]: hardware/accelerator probe.
//! - [`backend`]: per-accelerator inference adapter (`Backend` trait) and
//!   the warm-up coordinator.
//! - [`model_cache`]: single-instance-per-backend model store.
//! - [`session_manager`]: routing, fallback, and concurrency control.
//! - [`g2p`]: grapheme-to-phoneme conversion with fallback and caching.
//! - [`segmenter`]: text normalization and segment splitting.
//! - [`cache`]: primer micro-cache and full inference cache.
//! - [`streaming`]: per-request pipeline orchestration and audio checks.
//! - [`keepalive`]: idle-period warm-up scheduling.
//! - [`observability`]: timeline and metrics.
//! - [`config`]: validated configuration and feature gates.
//! - [`error`]: shared error taxonomy.
//! - [`api`]: HTTP request/response contract.
//! - [`service`]: top-level wiring of all of the above.

pub mod api;
pub mod audio;
pub mod backend;
pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod g2p;
pub mod keepalive;
pub mod model_cache;
pub mod models;
pub mod observability;
pub mod paths;
pub mod progress;
pub mod segmenter;
pub mod service;
pub mod session_manager;
pub mod streaming;

pub use config::ServeConfig;
pub use error::{BackendId, Result, ServeError};
pub use service::TtsService;
