//! Which inboxes may take a new claim right now.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;

use crate::domain::{DayBounds, DripError, InboxStats};
use crate::policy::RotationPolicy;
use crate::ports::InboxRegistry;

/// One eligibility decision.
#[derive(Debug, Clone, Default)]
pub struct EligibleSet {
    /// Active, unpaused, under cap; in rotation order.
    pub eligible: Vec<InboxStats>,
    /// Active and unpaused but out of capacity for today.
    pub capped: Vec<InboxStats>,
}

impl EligibleSet {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

pub struct EligibilityFilter {
    registry: Arc<dyn InboxRegistry>,
    utc_offset: FixedOffset,
    rotation: RotationPolicy,
    rng: Mutex<StdRng>,
}

impl EligibilityFilter {
    pub fn new(
        registry: Arc<dyn InboxRegistry>,
        utc_offset: FixedOffset,
        rotation: RotationPolicy,
    ) -> Self {
        Self {
            registry,
            utc_offset,
            rotation,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Recomputed from the registry on every call; nothing is cached
    /// between decisions.
    pub async fn eligible(&self, now: DateTime<Utc>) -> Result<EligibleSet, DripError> {
        let day = DayBounds::containing(now, self.utc_offset);
        let stats = self.registry.inbox_stats(day).await?;

        let mut set = EligibleSet::default();
        for stat in stats {
            if stat.is_eligible() {
                set.eligible.push(stat);
            } else if stat.inbox.active && !stat.inbox.paused {
                set.capped.push(stat);
            }
        }

        let mut rng = self.rng.lock().await;
        self.rotation.order(&mut set.eligible, &mut *rng);
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Inbox, InboxId, NewEmail, SendType};
    use crate::impls::InMemoryStore;
    use crate::ports::{ClaimRequest, Clock, FixedClock, QueueStore};
    use chrono::{TimeDelta, TimeZone};
    use ulid::Ulid;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    async fn add(store: &InMemoryStore, addr: &str, cap: u32) -> InboxId {
        store
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), addr, cap))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn excludes_paused_inactive_and_capped() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let open = add(&store, "open@s.com", 5).await;
        let paused = add(&store, "paused@s.com", 5).await;
        let inactive = add(&store, "inactive@s.com", 5).await;
        let capped = add(&store, "capped@s.com", 1).await;
        store.set_paused(paused, true).await.unwrap();
        store.set_active(inactive, false).await.unwrap();

        store
            .enqueue(NewEmail::simple("a@x.com", "s", "b", SendType::cold()))
            .await
            .unwrap();
        let claimed = store
            .claim_one(&ClaimRequest {
                inbox_id: capped,
                send_types: vec![SendType::cold()],
                day: DayBounds::containing(clock.now(), utc()),
                now: clock.now(),
            })
            .await
            .unwrap()
            .unwrap();
        store.mark_sent(claimed.id, capped, None, clock.now()).await.unwrap();

        let filter = EligibilityFilter::new(store.clone(), utc(), RotationPolicy::LeastRecentlyUsed);
        let set = filter.eligible(clock.now()).await.unwrap();

        let eligible: Vec<_> = set.eligible.iter().map(|s| s.inbox.id).collect();
        let capped_ids: Vec<_> = set.capped.iter().map(|s| s.inbox.id).collect();
        assert_eq!(eligible, vec![open]);
        assert_eq!(capped_ids, vec![capped]);
    }

    #[tokio::test]
    async fn pause_is_seen_by_the_next_decision() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let id = add(&store, "one@s.com", 5).await;
        let filter = EligibilityFilter::new(store.clone(), utc(), RotationPolicy::Random);

        assert_eq!(filter.eligible(clock.now()).await.unwrap().eligible.len(), 1);
        store.set_paused(id, true).await.unwrap();
        assert!(filter.eligible(clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_goes_first() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let busy = add(&store, "busy@s.com", 5).await;
        let idle = add(&store, "idle@s.com", 5).await;
        store.touch_last_used(busy, clock.now()).await.unwrap();
        store
            .touch_last_used(idle, clock.now() - TimeDelta::hours(3))
            .await
            .unwrap();

        let filter = EligibilityFilter::new(store.clone(), utc(), RotationPolicy::LeastRecentlyUsed);
        let set = filter.eligible(clock.now()).await.unwrap();

        let order: Vec<_> = set.eligible.iter().map(|s| s.inbox.id).collect();
        assert_eq!(order, vec![idle, busy]);
    }
}
