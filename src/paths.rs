//! Centralized filesystem paths for the serving engine.
//!
//! Single source of truth for all directories the process touches. Uses the
//! [`dirs`] crate for platform-appropriate resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/kokoro-serve/` | `~/.config/kokoro-serve/` |
//! | Cache | `~/Library/Caches/kokoro-serve/` | `~/.cache/kokoro-serve/` |
//!
//! # Environment Overrides
//!
//! - `KOKORO_TTS_CONFIG_DIR` — overrides [`config_dir`]
//! - `KOKORO_TTS_CACHE_DIR` — overrides [`cache_dir`]

use std::path::PathBuf;

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/kokoro-serve/` by default. Override with
/// `KOKORO_TTS_CONFIG_DIR`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("KOKORO_TTS_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("kokoro-serve"))
        .unwrap_or_else(|| PathBuf::from("/tmp/kokoro-serve-config"))
}

/// Application cache directory.
///
/// Used for downloaded model files and compiled-graph caches.
///
/// Resolves to `dirs::cache_dir()/kokoro-serve/` by default. Override with
/// `KOKORO_TTS_CACHE_DIR`.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("KOKORO_TTS_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("kokoro-serve"))
        .unwrap_or_else(|| PathBuf::from("/tmp/kokoro-serve-cache"))
}

/// Log file directory (`cache_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    cache_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// HuggingFace Hub cache directory (`cache_dir()/huggingface/`).
///
/// Set the `HF_HOME` environment variable to this path early in startup so
/// `hf-hub` stores models in a predictable, overridable location.
#[must_use]
pub fn hf_cache_dir() -> PathBuf {
    cache_dir().join("huggingface")
}

/// Ensure the `HF_HOME` environment variable points to [`hf_cache_dir`].
///
/// Call this once early in startup, before any model download. If `HF_HOME`
/// is already set, this is a no-op.
pub fn ensure_hf_home() {
    if std::env::var_os("HF_HOME").is_none() {
        let dir = hf_cache_dir();
        // SAFETY: called once at startup before any threads spawn.
        unsafe { std::env::set_var("HF_HOME", &dir) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_is_nonempty() {
        let dir = config_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn config_dir_contains_kokoro_serve() {
        let dir = config_dir();
        let s = dir.to_string_lossy();
        assert!(s.contains("kokoro-serve"), "config_dir: {s}");
    }

    #[test]
    fn cache_dir_contains_kokoro_serve() {
        let dir = cache_dir();
        let s = dir.to_string_lossy();
        assert!(s.contains("kokoro-serve"), "cache_dir: {s}");
    }

    #[test]
    fn config_file_ends_with_config_toml() {
        let path = config_file();
        let s = path.to_string_lossy();
        assert!(s.ends_with("config.toml"), "config_file: {s}");
    }

    #[test]
    fn logs_dir_is_subpath_of_cache_dir() {
        let logs = logs_dir();
        let cache = cache_dir();
        assert!(logs.starts_with(&cache));
    }

    #[test]
    fn hf_cache_dir_is_subpath_of_cache_dir() {
        let hf = hf_cache_dir();
        let cache = cache_dir();
        assert!(hf.starts_with(&cache));
    }

    #[test]
    fn config_dir_override_via_env() {
        let key = "KOKORO_TTS_CONFIG_DIR";
        let original = std::env::var_os(key);

        // SAFETY: tests run single-threaded per module.
        unsafe { std::env::set_var(key, "/custom/config") };
        let result = config_dir();
        assert_eq!(result, PathBuf::from("/custom/config"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn cache_dir_override_via_env() {
        let key = "KOKORO_TTS_CACHE_DIR";
        let original = std::env::var_os(key);

        unsafe { std::env::set_var(key, "/custom/cache") };
        let result = cache_dir();
        assert_eq!(result, PathBuf::from("/custom/cache"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn ensure_hf_home_sets_env_when_absent() {
        let key = "HF_HOME";
        let original = std::env::var_os(key);

        unsafe { std::env::remove_var(key) };
        ensure_hf_home();
        let val = std::env::var_os(key);
        assert!(val.is_some());
        let path = PathBuf::from(val.unwrap_or_default());
        assert!(path.to_string_lossy().contains("huggingface"));

        match original {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
