//! Typed identifiers for queue rows, inboxes, events and runs.
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker. ULIDs sort by creation time, so a queue ordered by id agrees with
//! one ordered by `created_at` when both come from the same generator.
//!
//! `EmailId` and `InboxId` are different types; passing one where the other
//! is expected does not compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each id kind. Provides the Display prefix.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by Display (e.g. "email-", "inbox-").
    fn prefix() -> &'static str;
}

/// Generic identifier.
///
/// Serialized as the bare ULID string; the prefix only exists for humans.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Storage form: the 26-character ULID without prefix.
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parses both the storage form and the prefixed Display form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// Marker types
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Email {}

impl IdMarker for Email {
    fn prefix() -> &'static str {
        "email-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Inbox {}

impl IdMarker for Inbox {
    fn prefix() -> &'static str {
        "inbox-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Identifier of a queued email.
pub type EmailId = Id<Email>;

/// Identifier of a sending inbox.
pub type InboxId = Id<Inbox>;

/// Identifier of a telemetry event.
pub type EventId = Id<Event>;

/// Identifier of one orchestrator run.
pub type RunId = Id<Run>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_kind_prefix() {
        let ulid = Ulid::new();
        assert!(EmailId::from_ulid(ulid).to_string().starts_with("email-"));
        assert!(InboxId::from_ulid(ulid).to_string().starts_with("inbox-"));
        assert!(EventId::from_ulid(ulid).to_string().starts_with("event-"));
        assert!(RunId::from_ulid(ulid).to_string().starts_with("run-"));
    }

    #[test]
    fn parses_storage_and_display_forms() {
        let id = InboxId::from_ulid(Ulid::new());

        let from_storage: InboxId = id.to_storage().parse().unwrap();
        let from_display: InboxId = id.to_string().parse().unwrap();

        assert_eq!(from_storage, id);
        assert_eq!(from_display, id);
        assert!("inbox-not-a-ulid".parse::<InboxId>().is_err());
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let ulid = Ulid::new();
        let id = EmailId::from_ulid(ulid);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<EmailId>(), size_of::<Ulid>());
    }
}
