//! Per-run knobs, resolved from config and command-line overrides.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::domain::DripError;
use crate::policy::{
    DEFAULT_RATIO, ErrorRateGovernor, Pacer, RetryPolicy, RotationPolicy, SendMix, SendWindow, Suppression,
};

/// Longest a run may wait for its first piece of work.
pub const MAX_ALLOW_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mix: SendMix,
    /// Absolute cap on claims in one run.
    pub limit: u32,
    /// Cap on cold-class sends in one run; `None` means only `limit` applies.
    pub drip_per_run: Option<u32>,
    /// How long to wait for the first eligible (inbox, record) pair.
    pub allow_wait: Duration,
    pub poll_interval: Duration,
    pub pacer: Pacer,
    /// How many records one inbox may take within a single run.
    pub max_per_inbox_per_run: Option<u32>,
    pub rotation: RotationPolicy,
    pub window: SendWindow,
    /// Offset used for the send window and for "today" in cap accounting.
    pub utc_offset: FixedOffset,
    pub governor: Option<ErrorRateGovernor>,
    pub suppression: Suppression,
    pub store_retry: RetryPolicy,
    pub dry_run: bool,
    /// Name reported in summaries and notifications.
    pub host: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mix: SendMix::Mixed {
                cold: DEFAULT_RATIO.0,
                friendly: DEFAULT_RATIO.1,
            },
            limit: 20,
            drip_per_run: None,
            allow_wait: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            pacer: Pacer::default_v1(),
            max_per_inbox_per_run: None,
            rotation: RotationPolicy::default(),
            window: SendWindow::default(),
            utc_offset: Utc.fix(),
            governor: None,
            suppression: Suppression::default(),
            store_retry: RetryPolicy::default_v1(),
            dry_run: false,
            host: "localhost".to_string(),
        }
    }
}

impl RunSettings {
    /// Reject combinations no run could honour.
    pub fn validate(&self) -> Result<(), DripError> {
        if self.pacer.min_delay > self.pacer.max_delay {
            return Err(DripError::Config(format!(
                "min delay {:?} exceeds max delay {:?}",
                self.pacer.min_delay, self.pacer.max_delay
            )));
        }
        if let SendMix::Mixed { cold: 0, friendly: 0 } = self.mix {
            return Err(DripError::Config("mixed ratio 0:0 has no slots".to_string()));
        }
        if self.allow_wait > MAX_ALLOW_WAIT {
            return Err(DripError::Config(format!(
                "allow wait {}s exceeds the {}s maximum",
                self.allow_wait.as_secs(),
                MAX_ALLOW_WAIT.as_secs()
            )));
        }
        if !self.allow_wait.is_zero() && self.poll_interval.is_zero() {
            return Err(DripError::Config(
                "poll interval must be positive when waiting for work".to_string(),
            ));
        }
        if let Some(governor) = &self.governor
            && !(0.0..=1.0).contains(&governor.max_failure_rate)
        {
            return Err(DripError::Config(format!(
                "governor failure rate {} is outside 0..=1",
                governor.max_failure_rate
            )));
        }
        if self.store_retry.max_attempts == 0 {
            return Err(DripError::Config("store retry needs at least one attempt".to_string()));
        }
        self.window.validate()
    }

    /// Sends at any hour with no pacing and no waiting; for tests and
    /// manual one-off runs.
    pub fn immediate() -> Self {
        Self {
            allow_wait: Duration::ZERO,
            pacer: Pacer::none(),
            window: SendWindow::Always,
            store_retry: RetryPolicy::no_retry(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        RunSettings::default().validate().unwrap();
        RunSettings::immediate().validate().unwrap();
    }

    #[rstest]
    #[case::zero_ratio(RunSettings { mix: SendMix::Mixed { cold: 0, friendly: 0 }, ..RunSettings::immediate() })]
    #[case::busy_poll(RunSettings { allow_wait: Duration::from_secs(30), poll_interval: Duration::ZERO, ..RunSettings::immediate() })]
    #[case::wait_too_long(RunSettings { allow_wait: MAX_ALLOW_WAIT + Duration::from_secs(1), ..RunSettings::immediate() })]
    #[case::wait_unbounded(RunSettings { allow_wait: Duration::MAX, ..RunSettings::immediate() })]
    #[case::no_attempts(RunSettings { store_retry: RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }, ..RunSettings::immediate() })]
    fn rejects(#[case] settings: RunSettings) {
        assert!(matches!(settings.validate(), Err(DripError::Config(_))));
    }

    #[test]
    fn a_full_day_of_waiting_is_allowed() {
        let settings = RunSettings {
            allow_wait: MAX_ALLOW_WAIT,
            ..RunSettings::immediate()
        };
        settings.validate().unwrap();
    }
}
