//! Percentile tracking for trend metrics using HDR Histogram.
//!
//! Trend values are milliseconds (possibly fractional). They are stored in
//! the histogram as whole microseconds, so every percentile is accurate to
//! 3 significant digits across the range 1µs to 1 hour.

use hdrhistogram::Histogram;
use tracing::warn;

/// Upper bound of the histogram in microseconds (1 hour).
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Percentile statistics for a set of measurements, all in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Histogram-backed tracker for a single trend metric.
///
/// Not synchronized on its own; callers hold it behind the sink lock.
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    histogram: Histogram<u64>,
    sum_ms: f64,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3).expect("Failed to create histogram");

        Self {
            histogram,
            sum_ms: 0.0,
        }
    }

    /// Record a measurement in milliseconds.
    pub fn record_ms(&mut self, value_ms: f64) {
        let value_ms = if value_ms.is_finite() { value_ms.max(0.0) } else { 0.0 };
        let value_us = ((value_ms * 1000.0).round() as u64).clamp(1, MAX_TRACKABLE_US);

        if let Err(e) = self.histogram.record(value_us) {
            warn!(
                value_us = value_us,
                error = %e,
                "Failed to record value in histogram"
            );
            return;
        }
        self.sum_ms += value_ms;
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Value at the given percentile (0-100) in milliseconds.
    ///
    /// Returns None when nothing has been recorded.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        if self.histogram.is_empty() {
            return None;
        }
        let quantile = (pct / 100.0).clamp(0.0, 1.0);
        Some(self.histogram.value_at_quantile(quantile) as f64 / 1000.0)
    }

    /// Mean of the recorded values, computed from the exact running sum.
    pub fn mean(&self) -> Option<f64> {
        if self.histogram.is_empty() {
            return None;
        }
        Some(self.sum_ms / self.histogram.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        (!self.histogram.is_empty()).then(|| self.histogram.min() as f64 / 1000.0)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.histogram.is_empty()).then(|| self.histogram.max() as f64 / 1000.0)
    }

    /// Get current percentile statistics, or None if empty.
    pub fn stats(&self) -> Option<PercentileStats> {
        if self.histogram.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: self.count(),
            min: self.min()?,
            max: self.max()?,
            mean: self.mean()?,
            p50: self.percentile(50.0)?,
            p90: self.percentile(90.0)?,
            p95: self.percentile(95.0)?,
        })
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}
