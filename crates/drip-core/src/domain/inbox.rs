//! Sending inboxes and the daily capacity they are judged against.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::InboxId;

/// A sending mailbox. Operators own `active`, `paused` and `daily_cap`; the
/// sender only ever writes `last_used_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbox {
    pub id: InboxId,
    pub email_address: String,
    pub domain: String,
    pub daily_cap: u32,
    pub active: bool,
    pub paused: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Transport kind, e.g. "smtp".
    pub provider: String,
    /// Opaque provider settings, interpreted by the transport.
    pub provider_config: serde_json::Value,
}

impl Inbox {
    /// An active, unpaused SMTP inbox with empty provider settings.
    pub fn new(id: InboxId, email_address: &str, daily_cap: u32) -> Self {
        let domain = email_address
            .rsplit_once('@')
            .map(|(_, d)| d.to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id,
            email_address: email_address.to_string(),
            domain,
            daily_cap,
            active: true,
            paused: false,
            last_used_at: None,
            provider: "smtp".to_string(),
            provider_config: serde_json::json!({}),
        }
    }
}

/// An inbox together with its usage for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxStats {
    pub inbox: Inbox,
    /// Rows with status `sent` whose `sent_at` falls inside the day.
    pub sent_today: u32,
    /// Rows currently `sending` through this inbox. They count against the
    /// cap so two concurrent claimants cannot both take the last slot.
    pub in_flight: u32,
}

impl InboxStats {
    pub fn used(&self) -> u32 {
        self.sent_today.saturating_add(self.in_flight)
    }

    pub fn remaining(&self) -> u32 {
        self.inbox.daily_cap.saturating_sub(self.used())
    }

    pub fn is_capped(&self) -> bool {
        self.used() >= self.inbox.daily_cap
    }

    /// active AND NOT paused AND usage below the daily cap.
    pub fn is_eligible(&self) -> bool {
        self.inbox.active && !self.inbox.paused && !self.is_capped()
    }
}

/// `[start, end)` of one local calendar day, expressed in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayBounds {
    /// The local day (at `offset`) that contains `now`.
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local_date = now.with_timezone(&offset).date_naive();
        let local_midnight = local_date.and_time(NaiveTime::MIN);
        let start = (local_midnight - TimeDelta::seconds(i64::from(offset.local_minus_utc())))
            .and_utc();
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn stats(active: bool, paused: bool, cap: u32, sent: u32, in_flight: u32) -> InboxStats {
        let mut inbox = Inbox::new(InboxId::from_ulid(Ulid::new()), "a@example.com", cap);
        inbox.active = active;
        inbox.paused = paused;
        InboxStats {
            inbox,
            sent_today: sent,
            in_flight,
        }
    }

    #[rstest]
    #[case::fresh(true, false, 3, 0, 0, true)]
    #[case::one_left(true, false, 3, 2, 0, true)]
    #[case::at_cap(true, false, 3, 3, 0, false)]
    #[case::over_cap(true, false, 3, 5, 0, false)]
    #[case::paused(true, true, 3, 0, 0, false)]
    #[case::inactive(false, false, 3, 0, 0, false)]
    #[case::zero_cap(true, false, 0, 0, 0, false)]
    #[case::last_slot_in_flight(true, false, 3, 2, 1, false)]
    fn eligibility(
        #[case] active: bool,
        #[case] paused: bool,
        #[case] cap: u32,
        #[case] sent: u32,
        #[case] in_flight: u32,
        #[case] eligible: bool,
    ) {
        assert_eq!(stats(active, paused, cap, sent, in_flight).is_eligible(), eligible);
    }

    #[test]
    fn domain_is_derived_from_address() {
        let inbox = Inbox::new(InboxId::from_ulid(Ulid::new()), "Sam@Mail.Example.COM", 5);
        assert_eq!(inbox.domain, "mail.example.com");
    }

    #[test]
    fn day_bounds_follow_the_configured_offset() {
        // 2024-03-05 02:00 UTC is still 2024-03-04 in New York (UTC-5).
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap();
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();

        let day = DayBounds::containing(now, offset);

        assert_eq!(day.start, Utc.with_ymd_and_hms(2024, 3, 4, 5, 0, 0).unwrap());
        assert_eq!(day.end, Utc.with_ymd_and_hms(2024, 3, 5, 5, 0, 0).unwrap());
        assert!(day.contains(now));
        assert!(!day.contains(day.end));
    }

    #[test]
    fn utc_day_starts_at_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap();
        let day = DayBounds::containing(now, FixedOffset::east_opt(0).unwrap());
        assert_eq!(day.start, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }
}
