//! Canonical learning rates.
//!
//! Log-space arithmetic produces values like `0.0089999999` and `0.009`
//! that must be treated as the same candidate. Every learning rate is
//! rounded to [`LR_DECIMALS`] decimal digits on construction and compared
//! on the rounded integer representation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SweepError, SweepResult};

/// Number of decimal digits kept by canonicalization.
pub const LR_DECIMALS: i32 = 5;

const SCALE: f64 = 100_000.0;

/// Smallest learning rate that survives canonicalization.
pub const MIN_LEARNING_RATE: f64 = 1.0 / SCALE;

/// A positive learning rate rounded to [`LR_DECIMALS`] decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LearningRate {
    /// Value in units of 1e-5.
    units: i64,
}

impl LearningRate {
    /// Canonicalize a raw learning rate.
    ///
    /// Fails for non-finite or non-positive input and for values that round
    /// to zero at five decimals.
    pub fn new(raw: f64) -> SweepResult<Self> {
        if !raw.is_finite() || raw <= 0.0 {
            return Err(SweepError::Validation(format!(
                "learning rate must be a positive finite number, got {raw}"
            )));
        }
        let units = (raw * SCALE).round();
        if units < 1.0 {
            return Err(SweepError::Validation(format!(
                "learning rate {raw} rounds to zero at {LR_DECIMALS} decimals"
            )));
        }
        if units > i64::MAX as f64 {
            return Err(SweepError::Validation(format!(
                "learning rate {raw} is out of range"
            )));
        }
        Ok(Self {
            units: units as i64,
        })
    }

    pub fn value(self) -> f64 {
        self.units as f64 / SCALE
    }

    pub fn log10(self) -> f64 {
        self.value().log10()
    }
}

impl TryFrom<f64> for LearningRate {
    type Error = SweepError;

    fn try_from(raw: f64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<LearningRate> for f64 {
    fn from(lr: LearningRate) -> Self {
        lr.value()
    }
}

impl fmt::Display for LearningRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}", self.value())
    }
}
