//! QueueStore port: the durable send queue.
//!
//! # Claim contract
//! `claim_one` is the only way a record leaves `queued`. In one atomic step
//! it must:
//! 1. pick the oldest claimable row by `(created_at, id)`, skipping rows
//!    already claimed by someone else instead of waiting on them,
//! 2. re-check that the inbox is active, unpaused and under its cap for
//!    `request.day`,
//! 3. move the row to `sending` bound to the inbox.
//!
//! Nothing is claimed if either check fails. `Ok(None)` means nothing to do;
//! `Err` with a transient kind means the store could not answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DayBounds, DripError, EmailId, EmailStatus, InboxId, NewEmail, QueuedEmail, SendType,
};

/// Everything a claim needs, resolved by the caller at claim time.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub inbox_id: InboxId,
    pub send_types: Vec<SendType>,
    pub day: DayBounds,
    pub now: DateTime<Utc>,
}

/// Row counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub error: usize,
}

impl QueueCounts {
    pub fn add(&mut self, status: EmailStatus, n: usize) {
        match status {
            EmailStatus::Queued => self.queued += n,
            EmailStatus::Sending => self.sending += n,
            EmailStatus::Sent => self.sent += n,
            EmailStatus::Error => self.error += n,
        }
    }
}

/// What the reaper does with a stale `sending` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimAction {
    /// Back to `queued`, unbound from its inbox.
    #[default]
    Requeue,
    /// To `error` with reason "abandoned while sending".
    Fail,
}

pub const ABANDONED_REASON: &str = "abandoned while sending";

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, email: NewEmail) -> Result<EmailId, DripError>;

    async fn claim_one(&self, request: &ClaimRequest) -> Result<Option<QueuedEmail>, DripError>;

    /// `sending -> sent`. Fails with `InvalidTransition` unless the row is
    /// `sending` and bound to `inbox_id`.
    async fn mark_sent(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), DripError>;

    /// `sending -> error`. Same preconditions as `mark_sent`.
    async fn mark_error(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DripError>;

    /// Give back a claim that was never attempted: `sending -> queued`,
    /// unbound from its inbox. Same preconditions as `mark_sent`.
    async fn release(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        at: DateTime<Utc>,
    ) -> Result<(), DripError>;

    async fn get(&self, id: EmailId) -> Result<Option<QueuedEmail>, DripError>;

    async fn counts_by_status(&self) -> Result<QueueCounts, DripError>;

    /// Complete `queued` rows of the given types. Used by the wait-for-work
    /// poll, never for claiming.
    async fn count_claimable(&self, send_types: &[SendType]) -> Result<usize, DripError>;

    /// Reconciliation: move `sending` rows last touched before `older_than`.
    async fn reclaim_stale(
        &self,
        older_than: DateTime<Utc>,
        action: ReclaimAction,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailId>, DripError>;
}
