//! IdGenerator port.
//!
//! Ids are ULIDs stamped from the Clock port. The generator is monotonic:
//! ids minted in the same millisecond still sort in mint order, which keeps
//! the `(created_at, id)` queue order stable.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use ulid::{Generator, Ulid};

use crate::domain::{EmailId, EventId, InboxId, RunId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_email_id(&self) -> EmailId;

    fn generate_inbox_id(&self) -> InboxId;

    fn generate_event_id(&self) -> EventId;

    fn generate_run_id(&self) -> RunId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
    inner: Mutex<Generator>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Generator::new()),
        }
    }

    fn next(&self) -> Ulid {
        let now = self.clock.now();
        let at = SystemTime::from(now);
        let monotonic = match self.inner.lock() {
            Ok(mut generator) => generator.generate_from_datetime(at).ok(),
            Err(_) => None,
        };
        // Falls back to a plain random ULID when the random part would
        // overflow within one millisecond.
        monotonic.unwrap_or_else(|| Ulid::from_parts(now.timestamp_millis() as u64, rand::random()))
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_email_id(&self) -> EmailId {
        EmailId::from(self.next())
    }

    fn generate_inbox_id(&self) -> InboxId {
        InboxId::from(self.next())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next())
    }

    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next())
    }
}
