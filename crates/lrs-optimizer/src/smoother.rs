//! Exponential moving average over a reported loss series.

use lrs_types::{SweepError, SweepResult};

/// Default EMA weight of the newest observation (a 0.97 smoothing factor).
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.03;

/// Reduces a noisy per-step loss series to a single fitness value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSmoother {
    alpha: f64,
}

impl MetricSmoother {
    pub fn new(alpha: f64) -> SweepResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(SweepError::Validation(format!(
                "smoothing alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Smoothed value aligned to the last element, or `None` for an empty
    /// series.
    ///
    /// The observation `k` steps before the last is weighted by
    /// `(1 - alpha)^k`, with weights normalized over the available history
    /// so a short series is not biased toward zero.
    pub fn smooth(&self, series: &[f64]) -> Option<f64> {
        if series.is_empty() {
            return None;
        }
        let decay = 1.0 - self.alpha;
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for &value in series {
            weighted_sum = weighted_sum * decay + value;
            total_weight = total_weight * decay + 1.0;
        }
        Some(weighted_sum / total_weight)
    }
}

impl Default for MetricSmoother {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_SMOOTHING_ALPHA,
        }
    }
}
