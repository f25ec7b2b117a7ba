//! ClaimEngine: one record for one inbox, or nothing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::FixedOffset;
use tracing::{debug, warn};

use crate::domain::{DayBounds, DripError, InboxId, QueuedEmail, SendClass};
use crate::policy::RetryPolicy;
use crate::ports::{ClaimRequest, Clock, QueueStore};

/// Retry `op` while it fails transiently, backing off per `policy`. Gives up
/// with `StoreRetriesExhausted` once the attempts are spent; any other error
/// is returned as-is on first sight.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    retries: &AtomicU32,
    mut op: F,
) -> Result<T, DripError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DripError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.next_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store failure; retrying"
                );
                retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_transient() => {
                return Err(DripError::StoreRetriesExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct ClaimEngine {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
    retry: RetryPolicy,
    retries: AtomicU32,
}

impl ClaimEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        utc_offset: FixedOffset,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            utc_offset,
            retry,
            retries: AtomicU32::new(0),
        }
    }

    /// Claim the oldest complete record of `class` for `inbox_id`.
    ///
    /// The request (types, day bounds, now) is rebuilt on every call so the
    /// inbox's cap is judged against the current day.
    pub async fn claim_one(
        &self,
        inbox_id: InboxId,
        class: SendClass,
    ) -> Result<Option<QueuedEmail>, DripError> {
        let now = self.clock.now();
        let request = ClaimRequest {
            inbox_id,
            send_types: class.accepted_types(),
            day: DayBounds::containing(now, self.utc_offset),
            now,
        };
        let claimed = retry_transient(&self.retry, "claim_one", &self.retries, || {
            self.store.claim_one(&request)
        })
        .await?;

        match &claimed {
            Some(email) => debug!(
                inbox = %inbox_id,
                email_id = %email.id,
                send_type = email.send_type_label(),
                "claimed"
            ),
            None => debug!(inbox = %inbox_id, %class, "nothing to claim"),
        }
        Ok(claimed)
    }

    /// Run any other store call of the same run under this engine's retry
    /// policy, so one counter covers every transient failure.
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, DripError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DripError>>,
    {
        retry_transient(&self.retry, operation, &self.retries, op).await
    }

    /// Transient failures retried so far by this engine.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{EmailId, EmailStatus, Inbox, NewEmail, SendType};
    use crate::impls::InMemoryStore;
    use crate::ports::{FixedClock, InboxRegistry, QueueCounts, ReclaimAction};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;
    use ulid::Ulid;

    /// Store wrapper whose first `fail_claims` claims fail transiently.
    pub(crate) struct FlakyStore {
        pub inner: Arc<InMemoryStore>,
        pub fail_claims: AtomicU32,
    }

    #[async_trait]
    impl QueueStore for FlakyStore {
        async fn enqueue(&self, email: NewEmail) -> Result<EmailId, DripError> {
            self.inner.enqueue(email).await
        }

        async fn claim_one(
            &self,
            request: &ClaimRequest,
        ) -> Result<Option<QueuedEmail>, DripError> {
            let left = self.fail_claims.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_claims.fetch_sub(1, Ordering::SeqCst);
                return Err(DripError::StoreUnavailable("database is locked".into()));
            }
            self.inner.claim_one(request).await
        }

        async fn mark_sent(
            &self,
            id: EmailId,
            inbox_id: InboxId,
            provider_message_id: Option<&str>,
            at: DateTime<Utc>,
        ) -> Result<(), DripError> {
            self.inner.mark_sent(id, inbox_id, provider_message_id, at).await
        }

        async fn mark_error(
            &self,
            id: EmailId,
            inbox_id: InboxId,
            reason: &str,
            at: DateTime<Utc>,
        ) -> Result<(), DripError> {
            self.inner.mark_error(id, inbox_id, reason, at).await
        }

        async fn release(
            &self,
            id: EmailId,
            inbox_id: InboxId,
            at: DateTime<Utc>,
        ) -> Result<(), DripError> {
            self.inner.release(id, inbox_id, at).await
        }

        async fn get(&self, id: EmailId) -> Result<Option<QueuedEmail>, DripError> {
            self.inner.get(id).await
        }

        async fn counts_by_status(&self) -> Result<QueueCounts, DripError> {
            self.inner.counts_by_status().await
        }

        async fn count_claimable(&self, send_types: &[SendType]) -> Result<usize, DripError> {
            self.inner.count_claimable(send_types).await
        }

        async fn reclaim_stale(
            &self,
            older_than: DateTime<Utc>,
            action: ReclaimAction,
            now: DateTime<Utc>,
        ) -> Result<Vec<EmailId>, DripError> {
            self.inner.reclaim_stale(older_than, action, now).await
        }
    }

    pub(crate) fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    async fn fixture(fail_claims: u32) -> (Arc<FlakyStore>, Arc<FixedClock>, InboxId) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let inner = Arc::new(InMemoryStore::new(clock.clone()));
        let inbox = inner
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), "s@sender.com", 5))
            .await
            .unwrap();
        inner
            .enqueue(NewEmail::simple("a@x.com", "s", "b", SendType::cold()))
            .await
            .unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            fail_claims: AtomicU32::new(fail_claims),
        });
        (store, clock, inbox)
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (store, clock, inbox) = fixture(2).await;
        let engine = ClaimEngine::new(store.clone(), clock, utc(), quick_retry(3));

        let claimed = engine.claim_one(inbox, SendClass::Cold).await.unwrap();

        assert_eq!(claimed.unwrap().status, EmailStatus::Sending);
        assert_eq!(engine.retries(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_escalate() {
        let (store, clock, inbox) = fixture(10).await;
        let engine = ClaimEngine::new(store.clone(), clock, utc(), quick_retry(3));

        let err = engine.claim_one(inbox, SendClass::Cold).await.unwrap_err();

        assert!(matches!(err, DripError::StoreRetriesExhausted { attempts: 3, .. }));
        assert!(!err.is_transient());
        assert_eq!(store.inner.counts_by_status().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn empty_is_not_an_error() {
        let (store, clock, inbox) = fixture(0).await;
        let engine = ClaimEngine::new(store.clone(), clock, utc(), quick_retry(1));

        assert!(engine.claim_one(inbox, SendClass::Friendly).await.unwrap().is_none());
        assert!(engine.claim_one(inbox, SendClass::Cold).await.unwrap().is_some());
        assert!(engine.claim_one(inbox, SendClass::Cold).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cap_is_judged_against_the_current_day() {
        let (store, clock, inbox) = fixture(0).await;
        store
            .inner
            .upsert_inbox(Inbox::new(InboxId::from_ulid(Ulid::new()), "s@sender.com", 1))
            .await
            .unwrap();
        store
            .inner
            .enqueue(NewEmail::simple("b@x.com", "s", "b", SendType::cold()))
            .await
            .unwrap();
        let engine = ClaimEngine::new(store.clone(), clock.clone(), utc(), quick_retry(1));

        let first = engine.claim_one(inbox, SendClass::Cold).await.unwrap().unwrap();
        store
            .inner
            .mark_sent(first.id, inbox, None, clock.now())
            .await
            .unwrap();
        assert!(engine.claim_one(inbox, SendClass::Cold).await.unwrap().is_none());

        clock.advance(chrono::TimeDelta::days(1));
        assert!(engine.claim_one(inbox, SendClass::Cold).await.unwrap().is_some());
    }
}
