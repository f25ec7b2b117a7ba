//! Sender configuration (`drip.toml`).
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Command-line flags override individual values after
//! loading; `validate()` runs before any lock or claim.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::app::RunSettings;
use crate::domain::DripError;
use crate::impls::SqliteConfig;
use crate::policy::{
    ErrorRateGovernor, Pacer, RetryPolicy, RotationPolicy, SendMix, SendWindow, Suppression,
};
use crate::ports::ReclaimAction;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub store: StoreConfig,
    pub lock: LockConfig,
    pub schedule: ScheduleConfig,
    pub run: RunConfig,
    pub governor: GovernorConfig,
    pub suppression: SuppressionConfig,
    /// Recipient domains whose mail is enqueued as `friendly`.
    pub friendly_domains: Vec<String>,
    pub transport: TransportConfig,
    pub notify: NotifyConfig,
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("drip.db"),
            busy_timeout_ms: 5_000,
            retry_attempts: 3,
            retry_base_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// One lock file per logical sender identity.
    pub path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("drip-sender.lock"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local time offset for the send window and for daily caps.
    pub utc_offset_minutes: i32,
    pub window: SendWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: String,
    pub ratio: Option<String>,
    pub drip_per_run: Option<u32>,
    pub limit: u32,
    pub allow_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub max_per_inbox_per_run: Option<u32>,
    pub rotation: RotationPolicy,
    /// Name used in summaries; falls back to `$HOSTNAME`.
    pub host: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: "mixed".to_string(),
            ratio: None,
            drip_per_run: None,
            limit: 20,
            allow_wait_secs: 0,
            poll_interval_secs: 5,
            min_delay_secs: 3.0,
            max_delay_secs: 9.0,
            max_per_inbox_per_run: None,
            rotation: RotationPolicy::default(),
            host: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub max_failure_rate: f64,
    pub min_samples: u64,
    pub lookback_hours: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_failure_rate: 0.5,
            min_samples: 10,
            lookback_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    pub addresses: Vec<String>,
    /// A domain also covers its subdomains.
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Smtp,
    DryRun,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub stale_after_secs: u64,
    pub action: ReclaimAction,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 15 * 60,
            action: ReclaimAction::Requeue,
        }
    }
}

impl SenderConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, DripError> {
        toml::from_str(raw).map_err(|e| DripError::Config(e.to_string()))
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DripError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw)
                .map_err(|e| DripError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DripError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, DripError> {
        self.schedule
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                DripError::Config(format!(
                    "utc offset {} minutes is out of range",
                    self.schedule.utc_offset_minutes
                ))
            })
    }

    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig {
            path: self.store.path.clone(),
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
        }
    }

    /// Check everything that does not need I/O.
    pub fn validate(&self) -> Result<(), DripError> {
        self.to_run_settings()?.validate()
    }

    /// Resolve the `[run]`, `[schedule]`, `[governor]` and `[suppression]`
    /// sections into the settings of one run.
    pub fn to_run_settings(&self) -> Result<RunSettings, DripError> {
        let run = &self.run;
        let mix = SendMix::from_mode(&run.mode, run.ratio.as_deref())?;
        let pacer = Pacer::new(
            secs(run.min_delay_secs, "min_delay_secs")?,
            secs(run.max_delay_secs, "max_delay_secs")?,
        )?;
        let governor = if self.governor.enabled {
            Some(ErrorRateGovernor::new(
                self.governor.max_failure_rate,
                self.governor.min_samples,
                Duration::from_secs(self.governor.lookback_hours.saturating_mul(3600)),
            )?)
        } else {
            None
        };
        let host = run.host.clone().unwrap_or_else(machine_hostname);

        Ok(RunSettings {
            mix,
            limit: run.limit,
            drip_per_run: run.drip_per_run,
            allow_wait: Duration::from_secs(run.allow_wait_secs),
            poll_interval: Duration::from_secs(run.poll_interval_secs),
            pacer,
            max_per_inbox_per_run: run.max_per_inbox_per_run,
            rotation: run.rotation,
            window: self.schedule.window.clone(),
            utc_offset: self.utc_offset()?,
            governor,
            suppression: Suppression::new(
                self.suppression.addresses.iter().cloned(),
                self.suppression.domains.iter().cloned(),
            ),
            store_retry: RetryPolicy {
                max_attempts: self.store.retry_attempts,
                base_delay: Duration::from_millis(self.store.retry_base_ms),
                multiplier: 2.0,
            },
            dry_run: self.transport.kind == TransportKind::DryRun,
            host,
        })
    }
}

/// This machine's name, for summaries when `[run] host` is unset.
fn machine_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn secs(value: f64, field: &str) -> Result<Duration, DripError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| DripError::Config(format!("{field} must be a non-negative number, got {value}")))
}
