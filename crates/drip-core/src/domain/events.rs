//! Telemetry events emitted by the send loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{EmailId, EventId, InboxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendEventKind {
    CandidateSelected,
    SendSuccess,
    SendError,
    SkipCap,
    GovernorHalt,
}

impl SendEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SendEventKind::CandidateSelected => "candidate_selected",
            SendEventKind::SendSuccess => "send_success",
            SendEventKind::SendError => "send_error",
            SendEventKind::SkipCap => "skip_cap",
            SendEventKind::GovernorHalt => "governor_halt",
        }
    }
}

impl fmt::Display for SendEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate_selected" => Ok(SendEventKind::CandidateSelected),
            "send_success" => Ok(SendEventKind::SendSuccess),
            "send_error" => Ok(SendEventKind::SendError),
            "skip_cap" => Ok(SendEventKind::SkipCap),
            "governor_halt" => Ok(SendEventKind::GovernorHalt),
            other => Err(format!("unknown send event kind: {other}")),
        }
    }
}

/// Append-only telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEvent {
    pub id: EventId,
    pub kind: SendEventKind,
    pub inbox_id: Option<InboxId>,
    pub email_id: Option<EmailId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Success/error tallies over a lookback window, read by the governor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub successes: u64,
    pub errors: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.successes + self.errors
    }

    pub fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.errors as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_their_serde_form() {
        for kind in [
            SendEventKind::CandidateSelected,
            SendEventKind::SendSuccess,
            SendEventKind::SendError,
            SendEventKind::SkipCap,
            SendEventKind::GovernorHalt,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<SendEventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn failure_rate_of_nothing_is_zero() {
        assert_eq!(OutcomeCounts::default().failure_rate(), 0.0);

        let counts = OutcomeCounts {
            successes: 3,
            errors: 1,
        };
        assert_eq!(counts.failure_rate(), 0.25);
    }
}
