//! Run summary: the one record an operator reads after each scheduled run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::RunId;

/// Why a completed run stopped sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainReason {
    /// The limit or drip slots were used up.
    LimitReached,
    /// No claimable record was left for any planned class.
    QueueDrained,
    /// No inbox was eligible (all capped, paused or inactive).
    NoEligibleInbox,
}

/// How a run ended. Every variant here is a normal exit (status 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { reason: DrainReason },
    /// Another run on this host held the lock.
    SkippedOverlap,
    /// The send window was closed and not overridden.
    OutsideWindow,
    /// The error-rate governor refused to start sending.
    GovernorHalted { failure_rate: f64 },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::SkippedOverlap => "skipped_overlap",
            RunOutcome::OutsideWindow => "outside_window",
            RunOutcome::GovernorHalted { .. } => "governor_halted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub host: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Records claimed (each claim is one attempt).
    pub attempted: u32,
    /// Successful sends per send type.
    pub sent_by_type: BTreeMap<String, u32>,
    pub errors: u32,
    /// Inboxes passed over because their daily cap was reached.
    pub skipped_cap: u32,
    /// Claimed records blocked by the suppression gate.
    pub blocked: u32,
    /// Claims retried after a transient store failure.
    pub store_retries: u32,
}

impl RunSummary {
    pub fn new(run_id: RunId, host: String, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            host,
            dry_run,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Completed {
                reason: DrainReason::QueueDrained,
            },
            attempted: 0,
            sent_by_type: BTreeMap::new(),
            errors: 0,
            skipped_cap: 0,
            blocked: 0,
            store_retries: 0,
        }
    }

    pub fn record_sent(&mut self, send_type: &str) {
        *self.sent_by_type.entry(send_type.to_string()).or_insert(0) += 1;
    }

    pub fn total_sent(&self) -> u32 {
        self.sent_by_type.values().sum()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn finish(&mut self, outcome: RunOutcome, at: DateTime<Utc>) {
        self.outcome = outcome;
        self.finished_at = at;
    }

    /// One line for logs and chat notifications.
    pub fn summary_line(&self) -> String {
        let by_type = self
            .sent_by_type
            .iter()
            .map(|(t, n)| format!("{t}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        let reason = match self.outcome {
            RunOutcome::Completed { reason } => format!(" ({reason:?})"),
            RunOutcome::GovernorHalted { failure_rate } => {
                format!(" (failure rate {:.0}%)", failure_rate * 100.0)
            }
            _ => String::new(),
        };
        format!(
            "{}{} on {}: sent={} [{}] errors={} blocked={} skipped_cap={} in {}ms{}",
            self.outcome.label(),
            reason,
            self.host,
            self.total_sent(),
            by_type,
            self.errors,
            self.blocked,
            self.skipped_cap,
            self.duration_ms(),
            if self.dry_run { " (dry run)" } else { "" },
        )
    }
}
