//! Reaper: reconciliation for rows abandoned in `sending`.
//!
//! A run killed between claim and finalize leaves its row `sending` and
//! bound to an inbox, holding one unit of that inbox's daily capacity. The
//! claim path never expires such rows on its own; this is the separate
//! process that does, either as a one-shot (`reap_once`) or on an interval
//! until shut down.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::{DripError, EmailId};
use crate::ports::{Clock, QueueStore, ReclaimAction};

pub struct Reaper {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    stale_after: TimeDelta,
    action: ReclaimAction,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        stale_after: TimeDelta,
        action: ReclaimAction,
    ) -> Self {
        Self {
            store,
            clock,
            stale_after,
            action,
        }
    }

    /// Reclaim every row that has been `sending` for longer than
    /// `stale_after`.
    pub async fn reap_once(&self) -> Result<Vec<EmailId>, DripError> {
        let now = self.clock.now();
        let reclaimed = self
            .store
            .reclaim_stale(now - self.stale_after, self.action, now)
            .await?;
        if !reclaimed.is_empty() {
            info!(
                count = reclaimed.len(),
                action = ?self.action,
                "reclaimed abandoned sends"
            );
        }
        Ok(reclaimed)
    }

    /// Reap every `interval` until `shutdown` flips to true. Failed passes
    /// are logged and retried on the next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut total = 0u64;
        let mut ticker = tokio::time::interval(interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            match self.reap_once().await {
                Ok(ids) => total += ids.len() as u64,
                Err(err) => warn!(error = %err, "reap pass failed"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmailStatus, Inbox, InboxId, NewEmail, SendType, DayBounds};
    use crate::impls::InMemoryStore;
    use crate::ports::{ABANDONED_REASON, ClaimRequest, FixedClock, InboxRegistry};
    use chrono::{FixedOffset, TimeZone, Utc};
    use ulid::Ulid;

    async fn stuck_row(clock: &Arc<FixedClock>, store: &InMemoryStore) -> EmailId {
        let inbox = store
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), "s@sender.com", 5))
            .await
            .unwrap();
        store
            .enqueue(NewEmail::simple("a@x.com", "s", "b", SendType::cold()))
            .await
            .unwrap();
        let now = clock.now();
        store
            .claim_one(&ClaimRequest {
                inbox_id: inbox,
                send_types: vec![SendType::cold()],
                day: DayBounds::containing(now, FixedOffset::east_opt(0).unwrap()),
                now,
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    fn fixture() -> (Arc<FixedClock>, Arc<InMemoryStore>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn fresh_sends_are_left_alone() {
        let (clock, store) = fixture();
        let id = stuck_row(&clock, &store).await;
        let reaper = Reaper::new(store.clone(), clock.clone(), TimeDelta::minutes(15), ReclaimAction::Requeue);

        clock.advance(TimeDelta::minutes(5));
        assert!(reaper.reap_once().await.unwrap().is_empty());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, EmailStatus::Sending);
    }

    #[tokio::test]
    async fn stale_sends_are_requeued() {
        let (clock, store) = fixture();
        let id = stuck_row(&clock, &store).await;
        let reaper = Reaper::new(store.clone(), clock.clone(), TimeDelta::minutes(15), ReclaimAction::Requeue);

        clock.advance(TimeDelta::minutes(20));
        assert_eq!(reaper.reap_once().await.unwrap(), vec![id]);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Queued);
        assert_eq!(row.inbox_id, None);
    }

    #[tokio::test]
    async fn stale_sends_can_be_failed_instead() {
        let (clock, store) = fixture();
        let id = stuck_row(&clock, &store).await;
        let reaper = Reaper::new(store.clone(), clock.clone(), TimeDelta::minutes(15), ReclaimAction::Fail);

        clock.advance(TimeDelta::hours(1));
        reaper.reap_once().await.unwrap();

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Error);
        assert_eq!(row.error.as_deref(), Some(ABANDONED_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_loop_stops_on_shutdown() {
        let (clock, store) = fixture();
        stuck_row(&clock, &store).await;
        clock.advance(TimeDelta::hours(1));
        let reaper = Reaper::new(store.clone(), clock.clone(), TimeDelta::minutes(15), ReclaimAction::Requeue);
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(95)).await;
            tx.send(true).unwrap();
        });
        let reclaimed = reaper.run(Duration::from_secs(30), rx).await;
        stopper.await.unwrap();

        assert_eq!(reclaimed, 1);
    }
}
