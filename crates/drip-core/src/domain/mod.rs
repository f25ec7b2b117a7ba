//! Domain model: records, identifiers, events and run results.
//!
//! Nothing in here performs I/O.

pub mod email;
pub mod errors;
pub mod events;
pub mod ids;
pub mod inbox;
pub mod outcome;
pub mod recipient;
pub mod summary;

pub use email::{
    BLANK_CHARS, EmailStatus, NewEmail, QueuedEmail, SendClass, SendType,
    MAX_ERROR_REASON_CHARS, truncate_reason,
};
pub use errors::{DeliveryError, DripError, ErrorKind};
pub use events::{OutcomeCounts, SendEvent, SendEventKind};
pub use ids::{EmailId, EventId, Id, IdMarker, InboxId, RunId};
pub use inbox::{DayBounds, Inbox, InboxStats};
pub use outcome::DeliveryReceipt;
pub use recipient::{classify_send_type, normalize_recipient, recipient_domain};
pub use summary::{DrainReason, RunOutcome, RunSummary};
