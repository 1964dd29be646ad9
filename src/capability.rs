//! Hardware / Capability Probe.
//!
//! A pure, side-effect-free query used at startup and whenever the
//! Multi-Session Manager recomputes its routing policy. Best-effort only:
//! a failed probe degrades silently to the CPU-only default rather than
//! retrying.

use serde::Serialize;

/// Detected host capabilities relevant to backend routing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Capabilities {
    /// Whether an Apple Neural Engine (CoreML) execution provider is usable.
    pub has_ane: bool,
    /// Whether a GPU (CUDA or DirectML) execution provider is usable.
    pub has_gpu: bool,
    /// Logical CPU core count.
    pub cpu_cores: usize,
    /// Total system RAM, in bytes, if it could be determined.
    pub total_ram_bytes: Option<u64>,
}

impl Capabilities {
    /// CPU-only fallback used when probing fails for any reason.
    fn cpu_only(cpu_cores: usize) -> Self {
        Self {
            has_ane: false,
            has_gpu: false,
            cpu_cores,
            total_ram_bytes: None,
        }
    }
}

/// Detect host capabilities. Never panics or retries; any individual probe
/// that fails degrades that field to its conservative default.
#[must_use]
pub fn detect() -> Capabilities {
    let cpu_cores = detect_cpu_cores();
    let total_ram_bytes = detect_total_ram_bytes();
    let has_ane = detect_has_ane();
    let has_gpu = detect_has_gpu();

    Capabilities {
        has_ane,
        has_gpu,
        cpu_cores,
        total_ram_bytes,
    }
}

fn detect_cpu_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn detect_total_ram_bytes() -> Option<u64> {
    if cfg!(target_os = "macos") {
        return run_cmd(&["sysctl", "-n", "hw.memsize"])?.parse::<u64>().ok();
    }
    if cfg!(target_os = "linux") {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if let Some(kb_str) = parts.first()
                    && let Ok(kb) = kb_str.parse::<u64>()
                {
                    return Some(kb.saturating_mul(1024));
                }
            }
        }
    }
    None
}

/// CoreML is only meaningful on macOS; detection is "are we on macOS" since
/// the `ort` coreml feature registers the provider unconditionally there
/// and the runtime itself reports unavailability at session-build time.
fn detect_has_ane() -> bool {
    cfg!(target_os = "macos")
}

/// GPU providers (`cuda`, `directml`) are compile-time features; if neither
/// is compiled in, there is nothing to probe for.
fn detect_has_gpu() -> bool {
    cfg!(feature = "cuda") || cfg!(feature = "directml")
}

fn run_cmd(args: &[&str]) -> Option<String> {
    let (program, rest) = args.split_first()?;
    let out = std::process::Command::new(program)
        .args(rest)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    let trimmed = s.trim().to_owned();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::cpu_only(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_never_panics_and_reports_at_least_one_core() {
        let caps = detect();
        assert!(caps.cpu_cores >= 1);
    }

    #[test]
    fn cpu_only_has_no_accelerators() {
        let caps = Capabilities::cpu_only(4);
        assert!(!caps.has_ane);
        assert!(!caps.has_gpu);
        assert_eq!(caps.cpu_cores, 4);
        assert!(caps.total_ram_bytes.is_none());
    }

    #[test]
    fn gpu_detection_is_false_without_gpu_features() {
        // Neither `cuda` nor `directml` is enabled in the default test build.
        assert!(!detect_has_gpu());
    }
}
