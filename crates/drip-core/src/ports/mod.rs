//! Ports: the seams between the send loop and the outside world.

pub mod clock;
pub mod id_generator;
pub mod inbox_registry;
pub mod notifier;
pub mod queue_store;
pub mod run_lock;
pub mod telemetry;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use id_generator::{IdGenerator, UlidGenerator};
pub use inbox_registry::InboxRegistry;
pub use notifier::{NoopNotifier, Notifier, RunNotification};
pub use queue_store::{ABANDONED_REASON, ClaimRequest, QueueCounts, QueueStore, ReclaimAction};
pub use run_lock::{RunLock, RunLockGuard};
pub use telemetry::TelemetrySink;
pub use transport::Transport;
