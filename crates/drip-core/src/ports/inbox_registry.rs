//! InboxRegistry port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DayBounds, DripError, Inbox, InboxId, InboxStats};

#[async_trait]
pub trait InboxRegistry: Send + Sync {
    /// Insert, or replace the operator-owned fields of an existing inbox
    /// with the same address.
    async fn upsert_inbox(&self, inbox: Inbox) -> Result<InboxId, DripError>;

    async fn find_by_address(&self, email_address: &str) -> Result<Option<Inbox>, DripError>;

    async fn set_paused(&self, id: InboxId, paused: bool) -> Result<(), DripError>;

    async fn set_active(&self, id: InboxId, active: bool) -> Result<(), DripError>;

    /// Every inbox with usage recomputed for `day`. Never cached.
    async fn inbox_stats(&self, day: DayBounds) -> Result<Vec<InboxStats>, DripError>;

    async fn touch_last_used(&self, id: InboxId, at: DateTime<Utc>) -> Result<(), DripError>;
}
