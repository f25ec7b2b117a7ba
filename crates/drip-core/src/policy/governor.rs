//! Error-rate governor: refuse to start a run while recent sends are failing.

use std::time::Duration;

use crate::domain::{DripError, OutcomeCounts};

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRateGovernor {
    /// Halt when `errors / (errors + successes)` reaches this value.
    pub max_failure_rate: f64,
    /// Do not judge on fewer outcomes than this.
    pub min_samples: u64,
    /// Window of send outcomes considered.
    pub lookback: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GovernorVerdict {
    Proceed,
    Halt { failure_rate: f64 },
}

impl ErrorRateGovernor {
    pub fn new(max_failure_rate: f64, min_samples: u64, lookback: Duration) -> Result<Self, DripError> {
        if !(0.0..=1.0).contains(&max_failure_rate) || max_failure_rate.is_nan() {
            return Err(DripError::Config(format!(
                "governor failure rate {max_failure_rate} is outside 0..=1"
            )));
        }
        Ok(Self {
            max_failure_rate,
            min_samples,
            lookback,
        })
    }

    pub fn judge(&self, counts: OutcomeCounts) -> GovernorVerdict {
        if counts.total() < self.min_samples.max(1) {
            return GovernorVerdict::Proceed;
        }
        let failure_rate = counts.failure_rate();
        if failure_rate >= self.max_failure_rate {
            GovernorVerdict::Halt { failure_rate }
        } else {
            GovernorVerdict::Proceed
        }
    }
}
