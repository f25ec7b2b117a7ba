//! TelemetrySink port: append-only send events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DripError, OutcomeCounts, SendEvent};

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Append one event. Callers treat failure as a warning.
    async fn record(&self, event: SendEvent) -> Result<(), DripError>;

    /// `send_success` / `send_error` tallies since `since`.
    async fn outcome_counts_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, DripError>;
}
