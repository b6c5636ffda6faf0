//! Progress bands, the conversion-time estimator, and the observer trait.
//!
//! Overall progress is a single `f32` in `[0, 1]` split into one band per
//! stage:
//!
//! ```text
//!  0.00 ───── upload ───── 0.33 ───── convert ───── 0.66 ───── download ───── 0.99 ─ 1.0
//! ```
//!
//! The conversion call has no native progress signal, so while it runs a
//! [`ProgressEstimator`] is ticked on a timer and extrapolates linearly
//! against an assumed duration, never leaving its band. The real reply
//! cancels the estimator.
//!
//! # Observing a conversion
//!
//! Implement [`ConversionObserver`] and feed it with
//! [`crate::converter::observe`]:
//!
//! ```rust
//! use slides2png::{ConversionObserver, ConversionStatus};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Percent(AtomicU32);
//!
//! impl ConversionObserver for Percent {
//!     fn on_progress(&self, value: f32) {
//!         self.0.store((value * 100.0) as u32, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::job::ConversionStatus;
use std::path::PathBuf;
use std::time::Duration;

/// A contiguous slice of the overall progress range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub start: f32,
    pub end: f32,
}

impl Band {
    pub const UPLOAD: Band = Band::new(0.0, 0.33);
    pub const CONVERT: Band = Band::new(0.33, 0.66);
    pub const DOWNLOAD: Band = Band::new(0.66, 0.99);

    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// The point `fraction` of the way through the band (clamped to it).
    pub fn at(&self, fraction: f32) -> f32 {
        let f = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.start + (self.end - self.start) * f
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.start && value <= self.end
    }
}

/// `done / total` as an `f32`, or `None` when the total is unknown or zero.
pub fn fraction(done: u64, total: Option<u64>) -> Option<f32> {
    match total {
        Some(t) if t > 0 => Some(done as f32 / t as f32),
        _ => None,
    }
}

/// Timer-driven linear estimate for a stage without a native signal.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    band: Band,
    ticks: u32,
    expected_ticks: u32,
}

impl ProgressEstimator {
    /// An estimator that fills `band` after `expected` has elapsed in ticks
    /// of `period`.
    pub fn new(band: Band, expected: Duration, period: Duration) -> Self {
        let period_ms = period.as_millis().max(1);
        let expected_ticks = expected.as_millis().div_ceil(period_ms).max(1);
        Self {
            band,
            ticks: 0,
            expected_ticks: u32::try_from(expected_ticks).unwrap_or(u32::MAX),
        }
    }

    /// Advance one tick and return the new estimate. Saturates at the band's
    /// end once the expected duration is exceeded.
    pub fn tick(&mut self) -> f32 {
        if self.ticks < self.expected_ticks {
            self.ticks += 1;
        }
        self.current()
    }

    pub fn current(&self) -> f32 {
        self.band.at(self.ticks as f32 / self.expected_ticks as f32)
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn expected_ticks(&self) -> u32 {
        self.expected_ticks
    }
}

/// Keeps reported progress inside the current stage's band and never lets it
/// go backwards within that stage.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    band: Band,
    last: Option<f32>,
}

impl Default for ProgressMeter {
    fn default() -> Self {
        Self::new(Band::UPLOAD)
    }
}

impl ProgressMeter {
    pub fn new(band: Band) -> Self {
        Self { band, last: None }
    }

    /// Switch to a new stage's band.
    pub fn enter(&mut self, band: Band) {
        self.band = band;
        self.last = None;
    }

    pub fn band(&self) -> Band {
        self.band
    }

    /// Report progress as a fraction of the current band.
    pub fn fraction(&mut self, fraction: f32) -> Option<f32> {
        let value = self.band.at(fraction);
        self.value(value)
    }

    /// Report an absolute progress value. It is clamped into the band and
    /// returned only if it does not go backwards.
    pub fn value(&mut self, value: f32) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        let value = value.clamp(self.band.start, self.band.end);
        match self.last {
            Some(last) if value < last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }
}

/// Receives conversion events.
///
/// All methods default to no-ops so implementations override only what they
/// need. Implementations must be `Send + Sync`: the observer is usually
/// driven from a task other than the one that created it.
pub trait ConversionObserver: Send + Sync {
    /// Overall progress in `[0, 1]`.
    fn on_progress(&self, value: f32) {
        let _ = value;
    }

    fn on_status_changed(&self, status: ConversionStatus) {
        let _ = status;
    }

    /// Low-priority diagnostics: raw reply bodies, header dumps, byte counts.
    fn on_debug(&self, message: &str) {
        let _ = message;
    }

    fn on_error(&self, message: &str) {
        let _ = message;
    }

    /// The job finished; `files` are the produced paths in arrival order.
    fn on_done(&self, files: &[PathBuf]) {
        let _ = files;
    }
}

/// An observer that ignores everything.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_partition_the_range() {
        assert_eq!(Band::UPLOAD.at(0.0), 0.0);
        assert_eq!(Band::UPLOAD.end, Band::CONVERT.start);
        assert_eq!(Band::CONVERT.end, Band::DOWNLOAD.start);
        assert!(Band::DOWNLOAD.end < 1.0);
    }

    #[test]
    fn band_at_clamps() {
        assert_eq!(Band::CONVERT.at(-1.0), 0.33);
        assert_eq!(Band::CONVERT.at(5.0), 0.66);
        assert_eq!(Band::CONVERT.at(f32::NAN), 0.33);
    }

    #[test]
    fn download_formula_matches_file_counts() {
        let v = Band::DOWNLOAD.at(1.0 / 4.0);
        assert!((v - (0.66 + 0.33 * 0.25)).abs() < 1e-6);
    }

    #[test]
    fn estimator_fills_band_after_expected_ticks() {
        let mut est = ProgressEstimator::new(
            Band::CONVERT,
            Duration::from_secs(15),
            Duration::from_millis(500),
        );
        assert_eq!(est.expected_ticks(), 30);
        let mut last = est.current();
        for _ in 0..30 {
            let v = est.tick();
            assert!(v >= last);
            assert!(Band::CONVERT.contains(v));
            last = v;
        }
        assert!((last - 0.66).abs() < 1e-6);
    }

    #[test]
    fn estimator_caps_on_overrun() {
        let mut est =
            ProgressEstimator::new(Band::CONVERT, Duration::from_secs(1), Duration::from_millis(500));
        for _ in 0..100 {
            est.tick();
        }
        assert_eq!(est.ticks(), 2);
        assert_eq!(est.current(), Band::CONVERT.end);
    }

    #[test]
    fn meter_is_monotonic_within_a_stage() {
        let mut m = ProgressMeter::new(Band::UPLOAD);
        assert_eq!(m.fraction(0.5), Some(0.165));
        assert_eq!(m.fraction(0.25), None);
        assert!(m.fraction(0.75).is_some());
    }

    #[test]
    fn meter_clamps_into_band() {
        let mut m = ProgressMeter::new(Band::DOWNLOAD);
        assert_eq!(m.value(0.1), Some(0.66));
        assert_eq!(m.value(2.0), Some(0.99));
    }

    #[test]
    fn entering_a_band_resets_monotonic_floor() {
        let mut m = ProgressMeter::new(Band::UPLOAD);
        m.fraction(1.0);
        m.enter(Band::CONVERT);
        assert_eq!(m.fraction(0.0), Some(0.33));
    }

    #[test]
    fn fraction_handles_unknown_totals() {
        assert_eq!(fraction(5, Some(10)), Some(0.5));
        assert_eq!(fraction(5, Some(0)), None);
        assert_eq!(fraction(5, None), None);
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_progress(0.5);
        o.on_status_changed(ConversionStatus::Uploading);
        o.on_debug("x");
        o.on_error("y");
        o.on_done(&[]);
    }
}
