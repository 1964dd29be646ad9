//! Primer micro-cache and full inference cache.

pub mod inference;
pub mod key;
pub mod primer;

pub use inference::InferenceCache;
pub use primer::PrimerCache;
