//! SendOrchestrator: one scheduled send run.
//!
//! ```text
//! Idle ──lock──> Locked ──> Running ──> Draining ──> Finished
//!   └─overlap / outside window──────────────────────────^
//! ```
//!
//! Per-record failures (delivery, suppression, a row finalized by someone
//! else) are recorded on the row and in telemetry and the loop moves on.
//! Only process-level failures (lock primitive, exhausted store retries, an
//! inbox the transport cannot use) come back as `Err`. Transport settings
//! are checked for every usable inbox before the lock is taken. The run lock guard lives on the stack of `run`, so
//! every exit path, unwinding included, releases it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use super::claim::ClaimEngine;
use super::eligibility::EligibilityFilter;
use super::settings::RunSettings;
use crate::domain::{
    DayBounds, DeliveryError, DrainReason, DripError, EmailId, Inbox, InboxId, InboxStats, QueuedEmail, RunOutcome, RunSummary,
    SendClass, SendEvent, SendEventKind, truncate_reason,
};
use crate::policy::GovernorVerdict;
use crate::ports::{
    Clock, IdGenerator, InboxRegistry, Notifier, QueueStore, RunLock, RunNotification,
    TelemetrySink, Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Locked,
    Running,
    Draining,
    Finished,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Locked)
                | (Idle, Finished)
                | (Locked, Running)
                | (Locked, Draining)
                | (Running, Draining)
                | (Draining, Finished)
        )
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(self.can_advance_to(next), "{self:?} -> {next:?}");
        debug!(from = ?*self, to = ?next, "run state");
        *self = next;
    }
}

/// What filling one slot of the plan produced.
enum Slot {
    Claimed(QueuedEmail, Inbox, SendClass),
    Exhausted(DrainReason),
}

/// Mutable bookkeeping for one run.
struct RunBook {
    summary: RunSummary,
    drained: HashSet<SendClass>,
    cap_reported: HashSet<InboxId>,
    per_inbox: HashMap<InboxId, u32>,
    cold_claimed: u32,
    delivered: u32,
    rng: StdRng,
}

pub struct SendOrchestrator {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) registry: Arc<dyn InboxRegistry>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) lock: Arc<dyn RunLock>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) settings: RunSettings,
}

impl SendOrchestrator {
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one run and return its summary.
    pub async fn run(&self) -> Result<RunSummary, DripError> {
        let settings = &self.settings;
        let run_id = self.ids.generate_run_id();
        let started_at = self.clock.now();
        let mut state = RunState::Idle;
        let mut summary =
            RunSummary::new(run_id, settings.host.clone(), settings.dry_run, started_at);

        if !settings.window.allows(started_at, settings.utc_offset) {
            info!(%run_id, "outside the send window; nothing to do");
            state.advance(RunState::Finished);
            summary.finish(RunOutcome::OutsideWindow, self.clock.now());
            return Ok(summary);
        }

        let engine = ClaimEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            settings.utc_offset,
            settings.store_retry.clone(),
        );
        if let Err(err) = self.preflight(&engine, started_at).await {
            error!(%run_id, error = %err, "preflight failed; nothing locked or claimed");
            return Err(err);
        }

        let Some(guard) = self.lock.try_acquire()? else {
            info!(%run_id, "another run holds the lock; skipping");
            state.advance(RunState::Finished);
            summary.finish(RunOutcome::SkippedOverlap, self.clock.now());
            return Ok(summary);
        };
        state.advance(RunState::Locked);
        info!(%run_id, lock = guard.name(), mix = %settings.mix, limit = settings.limit, "run started");

        self.notify(&RunNotification::Started {
            run_id,
            host: settings.host.clone(),
            at: started_at,
            limit: settings.limit,
            dry_run: settings.dry_run,
        })
        .await;

        let mut book = RunBook {
            summary,
            drained: HashSet::new(),
            cap_reported: HashSet::new(),
            per_inbox: HashMap::new(),
            cold_claimed: 0,
            delivered: 0,
            rng: StdRng::from_entropy(),
        };

        let result = self.locked(&engine, &mut book, &mut state).await;
        book.summary.store_retries = engine.retries();
        drop(guard);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%run_id, error = %err, "run aborted");
                return Err(err);
            }
        };
        state.advance(RunState::Finished);

        let mut summary = book.summary;
        summary.finish(outcome, self.clock.now());
        info!(%run_id, "{}", summary.summary_line());
        self.notify(&RunNotification::Finished(summary.clone())).await;
        Ok(summary)
    }

    /// Every active, unpaused inbox must be usable by the transport. A run
    /// that would fail on configuration fails here, before the lock.
    async fn preflight(&self, engine: &ClaimEngine, now: DateTime<Utc>) -> Result<(), DripError> {
        let day = DayBounds::containing(now, self.settings.utc_offset);
        let stats = engine
            .with_retry("inbox_stats", || self.registry.inbox_stats(day))
            .await?;
        for stat in stats.iter().filter(|s| s.inbox.active && !s.inbox.paused) {
            self.transport
                .check(&stat.inbox)
                .map_err(|err| unusable(&stat.inbox, &err))?;
        }
        Ok(())
    }

    /// Everything that happens while the lock is held.
    async fn locked(
        &self,
        engine: &ClaimEngine,
        book: &mut RunBook,
        state: &mut RunState,
    ) -> Result<RunOutcome, DripError> {
        let filter = EligibilityFilter::new(
            Arc::clone(&self.registry),
            self.settings.utc_offset,
            self.settings.rotation,
        );

        if let Some(failure_rate) = self.governor_halt().await {
            state.advance(RunState::Draining);
            return Ok(RunOutcome::GovernorHalted { failure_rate });
        }

        state.advance(RunState::Running);
        if let Some(reason) = self.wait_for_work(engine, &filter).await? {
            state.advance(RunState::Draining);
            return Ok(RunOutcome::Completed { reason });
        }

        let plan = self
            .settings
            .mix
            .plan(self.settings.limit, self.settings.drip_per_run);
        debug!(slots = plan.len(), "send plan");

        let mut reason = DrainReason::LimitReached;
        for class in plan {
            match self.fill_slot(engine, &filter, book, class).await? {
                Slot::Claimed(email, inbox, claimed_as) => {
                    self.process(engine, book, email, inbox, claimed_as).await?;
                }
                Slot::Exhausted(why) => {
                    reason = why;
                    break;
                }
            }
        }

        state.advance(RunState::Draining);
        Ok(RunOutcome::Completed { reason })
    }

    /// `Some(rate)` when the governor refuses to start sending.
    async fn governor_halt(&self) -> Option<f64> {
        let governor = self.settings.governor.as_ref()?;
        let lookback = chrono::TimeDelta::from_std(governor.lookback).ok()?;
        let since = self.clock.now() - lookback;
        let counts = match self.telemetry.outcome_counts_since(since).await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(error = %err, "could not read recent outcomes; governor skipped");
                return None;
            }
        };
        match governor.judge(counts) {
            GovernorVerdict::Proceed => None,
            GovernorVerdict::Halt { failure_rate } => {
                warn!(
                    failure_rate,
                    successes = counts.successes,
                    errors = counts.errors,
                    "recent failure rate too high; not sending"
                );
                self.emit(
                    SendEventKind::GovernorHalt,
                    None,
                    None,
                    format!(
                        "failure rate {:.2} over {} outcomes",
                        failure_rate,
                        counts.total()
                    ),
                )
                .await;
                Some(failure_rate)
            }
        }
    }

    /// Poll until at least one eligible inbox and one claimable record exist,
    /// or `allow_wait` runs out. `None` means there is work.
    async fn wait_for_work(
        &self,
        engine: &ClaimEngine,
        filter: &EligibilityFilter,
    ) -> Result<Option<DrainReason>, DripError> {
        let deadline = tokio::time::Instant::now()
            .checked_add(self.settings.allow_wait)
            .ok_or_else(|| {
                DripError::Config(format!(
                    "allow wait {}s is out of range",
                    self.settings.allow_wait.as_secs()
                ))
            })?;
        let classes = self.settings.mix.classes();
        loop {
            let now = self.clock.now();
            let eligible = engine
                .with_retry("eligible_inboxes", || filter.eligible(now))
                .await?;
            let mut pending = 0;
            for class in &classes {
                let types = class.accepted_types();
                pending += engine
                    .with_retry("count_claimable", || self.store.count_claimable(&types))
                    .await?;
            }
            if !eligible.is_empty() && pending > 0 {
                return Ok(None);
            }

            let reason = if eligible.is_empty() {
                DrainReason::NoEligibleInbox
            } else {
                DrainReason::QueueDrained
            };
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                info!(?reason, "no eligible work");
                return Ok(Some(reason));
            }
            debug!(?reason, wait_ms = left.as_millis() as u64, "waiting for work");
            tokio::time::sleep(left.min(self.settings.poll_interval)).await;
        }
    }

    /// Claim one record for a slot of `class`, falling back per the mix.
    async fn fill_slot(
        &self,
        engine: &ClaimEngine,
        filter: &EligibilityFilter,
        book: &mut RunBook,
        class: SendClass,
    ) -> Result<Slot, DripError> {
        let mut inbox_starved = false;
        let mut over_drip = false;

        for candidate in self.settings.mix.fallback(class) {
            if book.drained.contains(&candidate) {
                continue;
            }
            if candidate == SendClass::Cold
                && self
                    .settings
                    .drip_per_run
                    .is_some_and(|drip| book.cold_claimed >= drip)
            {
                over_drip = true;
                continue;
            }

            let now = self.clock.now();
            let set = engine
                .with_retry("eligible_inboxes", || filter.eligible(now))
                .await?;
            self.report_capped(book, &set.capped).await;

            let max_per_inbox = self.settings.max_per_inbox_per_run;
            let inboxes: Vec<Inbox> = set
                .eligible
                .into_iter()
                .map(|stat| stat.inbox)
                .filter(|inbox| {
                    max_per_inbox.is_none_or(|max| {
                        book.per_inbox.get(&inbox.id).copied().unwrap_or(0) < max
                    })
                })
                .collect();
            if inboxes.is_empty() {
                inbox_starved = true;
                continue;
            }

            for inbox in inboxes {
                if let Some(email) = engine.claim_one(inbox.id, candidate).await? {
                    return Ok(Slot::Claimed(email, inbox, candidate));
                }
            }

            let types = candidate.accepted_types();
            let left = engine
                .with_retry("count_claimable", || self.store.count_claimable(&types))
                .await?;
            if left == 0 {
                debug!(class = %candidate, "class drained");
                book.drained.insert(candidate);
            } else {
                // Rows exist but every inbox refused them inside the claim
                // (capacity taken by a concurrent run, or paused meanwhile).
                inbox_starved = true;
            }
        }

        let reason = if inbox_starved {
            DrainReason::NoEligibleInbox
        } else if over_drip {
            DrainReason::LimitReached
        } else {
            DrainReason::QueueDrained
        };
        Ok(Slot::Exhausted(reason))
    }

    /// One `skip_cap` event per capped inbox per run.
    async fn report_capped(&self, book: &mut RunBook, capped: &[InboxStats]) {
        for stat in capped {
            if !book.cap_reported.insert(stat.inbox.id) {
                continue;
            }
            book.summary.skipped_cap += 1;
            debug!(inbox = %stat.inbox.email_address, used = stat.used(), cap = stat.inbox.daily_cap, "inbox capped");
            self.emit(
                SendEventKind::SkipCap,
                Some(stat.inbox.id),
                None,
                format!(
                    "{} at cap: {}/{}",
                    stat.inbox.email_address,
                    stat.used(),
                    stat.inbox.daily_cap
                ),
            )
            .await;
        }
    }

    /// Gate, deliver and finalize one claimed record.
    async fn process(
        &self,
        engine: &ClaimEngine,
        book: &mut RunBook,
        mut email: QueuedEmail,
        inbox: Inbox,
        class: SendClass,
    ) -> Result<(), DripError> {
        book.summary.attempted += 1;
        *book.per_inbox.entry(inbox.id).or_insert(0) += 1;
        if class == SendClass::Cold {
            book.cold_claimed += 1;
        }
        let send_type = email.send_type_label().to_string();
        self.emit(
            SendEventKind::CandidateSelected,
            Some(inbox.id),
            Some(email.id),
            format!("{send_type} via {}", inbox.email_address),
        )
        .await;

        let recipient = email.to_email.as_deref().unwrap_or_default();
        match self.settings.suppression.check(recipient) {
            Ok(normalized) => email.to_email = Some(normalized),
            Err(blocked) => {
                let reason = blocked.reason();
                warn!(email_id = %email.id, reason, "recipient blocked");
                if self.finish_error(engine, &email, inbox.id, reason).await? {
                    book.summary.blocked += 1;
                }
                return Ok(());
            }
        }

        if book.delivered > 0 {
            let delay = self.settings.pacer.next_delay(&mut book.rng);
            debug!(delay_ms = delay.as_millis() as u64, "pacing");
            tokio::time::sleep(delay).await;
        }
        book.delivered += 1;

        match self.transport.deliver(&email, &inbox).await {
            Ok(receipt) => {
                let at = self.clock.now();
                let message_id = receipt.provider_message_id.as_deref();
                let result = engine
                    .with_retry("mark_sent", || {
                        self.store.mark_sent(email.id, inbox.id, message_id, at)
                    })
                    .await;
                if !self.finalize(email.id, result)? {
                    return Ok(());
                }
                if let Err(err) = self.registry.touch_last_used(inbox.id, at).await {
                    warn!(inbox = %inbox.email_address, error = %err, "could not update last_used_at");
                }
                book.summary.record_sent(&send_type);
                info!(
                    email_id = %email.id,
                    inbox = %inbox.email_address,
                    send_type,
                    "sent"
                );
                self.emit(
                    SendEventKind::SendSuccess,
                    Some(inbox.id),
                    Some(email.id),
                    receipt
                        .provider_message_id
                        .unwrap_or_else(|| format!("sent via {}", inbox.email_address)),
                )
                .await;
            }
            Err(err @ DeliveryError::Misconfigured(_)) => {
                error!(
                    email_id = %email.id,
                    inbox = %inbox.email_address,
                    error = %err,
                    "inbox unusable; releasing claim and stopping"
                );
                let at = self.clock.now();
                let released = engine
                    .with_retry("release", || self.store.release(email.id, inbox.id, at))
                    .await;
                self.finalize(email.id, released)?;
                return Err(unusable(&inbox, &err));
            }
            Err(err) => {
                warn!(
                    email_id = %email.id,
                    inbox = %inbox.email_address,
                    error = %err,
                    "delivery failed"
                );
                let reason = truncate_reason(&err.to_string());
                if self.finish_error(engine, &email, inbox.id, &reason).await? {
                    book.summary.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Move a record to `error` and emit `send_error`. `Ok(false)` when the
    /// row was no longer ours to finalize.
    async fn finish_error(
        &self,
        engine: &ClaimEngine,
        email: &QueuedEmail,
        inbox_id: InboxId,
        reason: &str,
    ) -> Result<bool, DripError> {
        let at = self.clock.now();
        let result = engine
            .with_retry("mark_error", || {
                self.store.mark_error(email.id, inbox_id, reason, at)
            })
            .await;
        if !self.finalize(email.id, result)? {
            return Ok(false);
        }
        self.emit(
            SendEventKind::SendError,
            Some(inbox_id),
            Some(email.id),
            reason.to_string(),
        )
        .await;
        Ok(true)
    }

    /// A row finalized or reclaimed behind our back is logged and skipped;
    /// anything else is a process-level failure.
    fn finalize(
        &self,
        id: EmailId,
        result: Result<(), DripError>,
    ) -> Result<bool, DripError> {
        match result {
            Ok(()) => Ok(true),
            Err(err @ (DripError::InvalidTransition { .. } | DripError::NotFound(_))) => {
                warn!(email_id = %id, error = %err, "record changed under the run; skipping");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Best-effort telemetry.
    async fn emit(
        &self,
        kind: SendEventKind,
        inbox_id: Option<InboxId>,
        email_id: Option<EmailId>,
        message: String,
    ) {
        let event = SendEvent {
            id: self.ids.generate_event_id(),
            kind,
            inbox_id,
            email_id,
            message,
            created_at: self.clock.now(),
        };
        if let Err(err) = self.telemetry.record(event).await {
            warn!(%kind, error = %err, "telemetry write failed; continuing");
        }
    }

    /// Best-effort notification.
    async fn notify(&self, notification: &RunNotification) {
        if let Err(err) = self.notifier.notify(notification).await {
            warn!(error = %err, "notification failed");
        }
    }
}

fn unusable(inbox: &Inbox, err: &DeliveryError) -> DripError {
    DripError::Config(format!("inbox {}: {err}", inbox.email_address))
}
