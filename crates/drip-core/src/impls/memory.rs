//! In-memory store: queue, inbox registry and telemetry behind one lock.
//!
//! Every claim runs select-then-update while holding the state lock, which is
//! the in-process equivalent of a skip-locked row claim. Used by tests and
//! for embedding; state is lost with the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{
    DayBounds, DripError, EmailId, EmailStatus, Inbox, InboxId, InboxStats, NewEmail,
    OutcomeCounts, QueuedEmail, SendEvent, SendEventKind, SendType, truncate_reason,
};
use crate::ports::{
    ABANDONED_REASON, ClaimRequest, Clock, IdGenerator, InboxRegistry, QueueCounts, QueueStore,
    ReclaimAction, TelemetrySink, UlidGenerator,
};

#[derive(Default)]
struct InMemoryState {
    /// All queue rows (single source of truth).
    emails: HashMap<EmailId, QueuedEmail>,

    inboxes: HashMap<InboxId, Inbox>,

    /// Append-only.
    events: Vec<SendEvent>,
}

impl InMemoryState {
    /// (sent inside `day`, currently sending) for one inbox.
    fn usage(&self, inbox_id: InboxId, day: DayBounds) -> (u32, u32) {
        let mut sent_today = 0;
        let mut in_flight = 0;
        for email in self.emails.values() {
            if email.inbox_id != Some(inbox_id) {
                continue;
            }
            match email.status {
                EmailStatus::Sent if email.sent_at.is_some_and(|t| day.contains(t)) => {
                    sent_today += 1
                }
                EmailStatus::Sending => in_flight += 1,
                _ => {}
            }
        }
        (sent_today, in_flight)
    }

    fn stats(&self, inbox: &Inbox, day: DayBounds) -> InboxStats {
        let (sent_today, in_flight) = self.usage(inbox.id, day);
        InboxStats {
            inbox: inbox.clone(),
            sent_today,
            in_flight,
        }
    }

    /// Oldest claimable row by `(created_at, id)`.
    fn next_claimable(&self, send_types: &[SendType]) -> Option<EmailId> {
        self.emails
            .values()
            .filter(|e| e.is_claimable_for(send_types))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|e| e.id)
    }

    /// Move a `sending` row bound to `inbox_id` into a terminal status.
    fn finalize(
        &mut self,
        id: EmailId,
        inbox_id: InboxId,
        to: EmailStatus,
    ) -> Result<&mut QueuedEmail, DripError> {
        let email = self
            .emails
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(id.to_string()))?;
        if !email.status.can_transition(to) || email.inbox_id != Some(inbox_id) {
            return Err(DripError::InvalidTransition {
                id,
                from: email.status,
                to,
            });
        }
        email.status = to;
        Ok(email)
    }
}

/// In-memory implementation of every store port.
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
        }
    }

    /// Snapshot of all recorded events, oldest first.
    pub async fn events(&self) -> Vec<SendEvent> {
        self.state.lock().await.events.clone()
    }

    /// Snapshot of all rows in queue order.
    pub async fn emails(&self) -> Vec<QueuedEmail> {
        let state = self.state.lock().await;
        let mut all: Vec<_> = state.emails.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(&self, email: NewEmail) -> Result<EmailId, DripError> {
        let id = self.ids.generate_email_id();
        let record = email.into_record(id, self.clock.now());
        self.state.lock().await.emails.insert(id, record);
        Ok(id)
    }

    async fn claim_one(&self, request: &ClaimRequest) -> Result<Option<QueuedEmail>, DripError> {
        let mut state = self.state.lock().await;

        let Some(inbox) = state.inboxes.get(&request.inbox_id) else {
            return Ok(None);
        };
        if !state.stats(inbox, request.day).is_eligible() {
            debug!(inbox = %request.inbox_id, "inbox no longer eligible at claim time");
            return Ok(None);
        }

        let Some(id) = state.next_claimable(&request.send_types) else {
            return Ok(None);
        };
        let Some(email) = state.emails.get_mut(&id) else {
            return Ok(None);
        };
        email.status = EmailStatus::Sending;
        email.inbox_id = Some(request.inbox_id);
        email.updated_at = request.now;
        Ok(Some(email.clone()))
    }

    async fn mark_sent(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        provider_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let email = state.finalize(id, inbox_id, EmailStatus::Sent)?;
        email.provider_message_id = provider_message_id.map(str::to_string);
        email.sent_at = Some(at);
        email.updated_at = at;
        email.error = None;
        Ok(())
    }

    async fn mark_error(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let email = state.finalize(id, inbox_id, EmailStatus::Error)?;
        email.error = Some(truncate_reason(reason));
        email.updated_at = at;
        Ok(())
    }

    async fn release(
        &self,
        id: EmailId,
        inbox_id: InboxId,
        at: DateTime<Utc>,
    ) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let email = state
            .emails
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(id.to_string()))?;
        if !email.status.is_reclaimable() || email.inbox_id != Some(inbox_id) {
            return Err(DripError::InvalidTransition {
                id,
                from: email.status,
                to: EmailStatus::Queued,
            });
        }
        email.status = EmailStatus::Queued;
        email.inbox_id = None;
        email.updated_at = at;
        Ok(())
    }

    async fn get(&self, id: EmailId) -> Result<Option<QueuedEmail>, DripError> {
        Ok(self.state.lock().await.emails.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, DripError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for email in state.emails.values() {
            counts.add(email.status, 1);
        }
        Ok(counts)
    }

    async fn count_claimable(&self, send_types: &[SendType]) -> Result<usize, DripError> {
        let state = self.state.lock().await;
        Ok(state
            .emails
            .values()
            .filter(|e| e.is_claimable_for(send_types))
            .count())
    }

    async fn reclaim_stale(
        &self,
        older_than: DateTime<Utc>,
        action: ReclaimAction,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailId>, DripError> {
        let mut state = self.state.lock().await;
        let mut reclaimed = Vec::new();
        for email in state.emails.values_mut() {
            if !email.status.is_reclaimable() || email.updated_at >= older_than {
                continue;
            }
            match action {
                ReclaimAction::Requeue => {
                    email.status = EmailStatus::Queued;
                    email.inbox_id = None;
                }
                ReclaimAction::Fail => {
                    email.status = EmailStatus::Error;
                    email.error = Some(ABANDONED_REASON.to_string());
                }
            }
            email.updated_at = now;
            reclaimed.push(email.id);
        }
        reclaimed.sort();
        Ok(reclaimed)
    }
}

#[async_trait]
impl InboxRegistry for InMemoryStore {
    async fn upsert_inbox(&self, inbox: Inbox) -> Result<InboxId, DripError> {
        let mut state = self.state.lock().await;
        let existing = state
            .inboxes
            .values()
            .find(|i| i.email_address.eq_ignore_ascii_case(&inbox.email_address))
            .map(|i| (i.id, i.last_used_at));
        let inbox = match existing {
            Some((id, last_used_at)) => Inbox {
                id,
                last_used_at,
                ..inbox
            },
            None => inbox,
        };
        let id = inbox.id;
        state.inboxes.insert(id, inbox);
        Ok(id)
    }

    async fn find_by_address(&self, email_address: &str) -> Result<Option<Inbox>, DripError> {
        let state = self.state.lock().await;
        Ok(state
            .inboxes
            .values()
            .find(|i| i.email_address.eq_ignore_ascii_case(email_address))
            .cloned())
    }

    async fn set_paused(&self, id: InboxId, paused: bool) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let inbox = state
            .inboxes
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(id.to_string()))?;
        inbox.paused = paused;
        Ok(())
    }

    async fn set_active(&self, id: InboxId, active: bool) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let inbox = state
            .inboxes
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(id.to_string()))?;
        inbox.active = active;
        Ok(())
    }

    async fn inbox_stats(&self, day: DayBounds) -> Result<Vec<InboxStats>, DripError> {
        let state = self.state.lock().await;
        let mut stats: Vec<_> = state
            .inboxes
            .values()
            .map(|inbox| state.stats(inbox, day))
            .collect();
        stats.sort_by(|a, b| a.inbox.id.cmp(&b.inbox.id));
        Ok(stats)
    }

    async fn touch_last_used(&self, id: InboxId, at: DateTime<Utc>) -> Result<(), DripError> {
        let mut state = self.state.lock().await;
        let inbox = state
            .inboxes
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(id.to_string()))?;
        inbox.last_used_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for InMemoryStore {
    async fn record(&self, event: SendEvent) -> Result<(), DripError> {
        self.state.lock().await.events.push(event);
        Ok(())
    }

    async fn outcome_counts_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, DripError> {
        let state = self.state.lock().await;
        let mut counts = OutcomeCounts::default();
        for event in state.events.iter().filter(|e| e.created_at >= since) {
            match event.kind {
                SendEventKind::SendSuccess => counts.successes += 1,
                SendEventKind::SendError => counts.errors += 1,
                _ => {}
            }
        }
        Ok(counts)
    }
}
