//! The `AudioBuffer` entity and its corruption checks.
//!
//! Generalizes the `KokoroTts::synthesize` return value (a bare
//! `Vec<f32>` at a fixed 24 kHz) into an owned buffer that carries its own
//! validity report, so callers never need to re-derive "is this usable"
//! from raw samples.

/// Output sample rate for the Kokoro-82M graph. Fixed; not configurable,
/// matching the `KokoroTts::sample_rate()`.
pub const SAMPLE_RATE_HZ: u32 = 24_000;

/// Minimum sample count for a buffer to be considered valid.
pub const MIN_VALID_SAMPLES: usize = 100;

/// A segment's synthesized audio: 24 kHz mono f32 PCM plus a validity report
/// computed by [`AudioBuffer::check`].
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono PCM samples at [`SAMPLE_RATE_HZ`].
    pub samples: Vec<f32>,
    /// Validity report computed when the buffer was checked.
    pub validity: SampleValidity,
}

/// Outcome of running an [`AudioBuffer`] through the corruption-detection
/// rules in [`AudioBuffer::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleValidity {
    /// Sample count and RMS are both within normal bounds.
    Ok,
    /// NaN/±Inf samples were replaced with 0.0; audio is still emitted.
    Sanitized {
        /// Number of non-finite samples replaced.
        replaced: usize,
    },
    /// RMS is below the configured floor but the buffer is not all-zero;
    /// still emitted, logged as a warning.
    Quiet,
    /// Sample count is `<= MIN_VALID_SAMPLES`, or every sample is (within
    /// tolerance of) zero. The buffer must not be cached or emitted; the
    /// caller should treat the segment as `SynthesisFailed`.
    Rejected {
        /// Human-readable reason.
        reason: &'static str,
    },
}

impl AudioBuffer {
    /// Run a raw sample vector through the sanitize/reject rules and wrap it
    /// as a checked [`AudioBuffer`].
    ///
    /// Rules, in order:
    /// 1. Reject if `len <= MIN_VALID_SAMPLES`.
    /// 2. Replace NaN/±Inf with `0.0` (sanitize, don't reject).
    /// 3. Reject if every sample is zero within `zero_tolerance`.
    /// 4. Flag `Quiet` if RMS is below `silence_rms_floor` and not all-zero.
    #[must_use]
    pub fn check(mut samples: Vec<f32>, silence_rms_floor: f32, zero_tolerance: f32) -> Self {
        if samples.len() <= MIN_VALID_SAMPLES {
            return Self {
                samples,
                validity: SampleValidity::Rejected {
                    reason: "sample count at or below minimum",
                },
            };
        }

        let mut replaced = 0usize;
        for s in &mut samples {
            if !s.is_finite() {
                *s = 0.0;
                replaced += 1;
            }
        }

        let all_zero = samples.iter().all(|s| s.abs() <= zero_tolerance);
        if all_zero {
            return Self {
                samples,
                validity: SampleValidity::Rejected {
                    reason: "all samples are zero",
                },
            };
        }

        if replaced > 0 {
            return Self {
                samples,
                validity: SampleValidity::Sanitized { replaced },
            };
        }

        let rms = rms_of(&samples);
        let validity = if rms < silence_rms_floor {
            SampleValidity::Quiet
        } else {
            SampleValidity::Ok
        };

        Self { samples, validity }
    }

    /// Whether this buffer passed validation and may be cached/emitted.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self.validity, SampleValidity::Rejected { .. })
    }

    /// Audio duration in seconds at [`SAMPLE_RATE_HZ`].
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(SAMPLE_RATE_HZ)
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}
