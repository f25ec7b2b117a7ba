//! StatusView: what the queue and the inbox pool look like right now.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::domain::{DayBounds, DripError, InboxStats};
use crate::ports::{InboxRegistry, QueueCounts, QueueStore};

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub generated_at: DateTime<Utc>,
    pub counts: QueueCounts,
    pub inboxes: Vec<InboxStatus>,
}

/// One inbox row of the status view.
#[derive(Debug, Clone, Serialize)]
pub struct InboxStatus {
    pub email_address: String,
    pub active: bool,
    pub paused: bool,
    pub daily_cap: u32,
    pub sent_today: u32,
    pub in_flight: u32,
    pub remaining: u32,
    pub eligible: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&InboxStats> for InboxStatus {
    fn from(stats: &InboxStats) -> Self {
        Self {
            email_address: stats.inbox.email_address.clone(),
            active: stats.inbox.active,
            paused: stats.inbox.paused,
            daily_cap: stats.inbox.daily_cap,
            sent_today: stats.sent_today,
            in_flight: stats.in_flight,
            remaining: stats.remaining(),
            eligible: stats.is_eligible(),
            last_used_at: stats.inbox.last_used_at,
        }
    }
}

impl StatusView {
    pub async fn collect(
        store: &dyn QueueStore,
        registry: &dyn InboxRegistry,
        now: DateTime<Utc>,
        utc_offset: FixedOffset,
    ) -> Result<Self, DripError> {
        let counts = store.counts_by_status().await?;
        let stats = registry
            .inbox_stats(DayBounds::containing(now, utc_offset))
            .await?;
        Ok(Self {
            generated_at: now,
            counts,
            inboxes: stats.iter().map(InboxStatus::from).collect(),
        })
    }

    /// Inboxes that could take a claim right now.
    pub fn eligible_inboxes(&self) -> usize {
        self.inboxes.iter().filter(|i| i.eligible).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Inbox, InboxId, NewEmail, SendType};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use std::sync::Arc;
    use ulid::Ulid;

    #[tokio::test]
    async fn reports_counts_and_inbox_capacity() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let store = InMemoryStore::new(Arc::new(FixedClock::new(now)));
        let paused = store
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), "p@sender.com", 3))
            .await
            .unwrap();
        store
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), "a@sender.com", 3))
            .await
            .unwrap();
        store.set_paused(paused, true).await.unwrap();
        store
            .enqueue(NewEmail::simple("x@lead.com", "s", "b", SendType::cold()))
            .await
            .unwrap();

        let view = StatusView::collect(&store, &store, now, FixedOffset::east_opt(0).unwrap())
            .await
            .unwrap();

        assert_eq!(view.counts.queued, 1);
        assert_eq!(view.inboxes.len(), 2);
        assert_eq!(view.eligible_inboxes(), 1);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["counts"]["queued"], 1);
        assert_eq!(json["inboxes"][0]["remaining"], 3);
    }
}
