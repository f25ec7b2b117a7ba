//! Port implementations.

pub mod dry_run;
pub mod file_lock;
pub mod memory;
pub mod smtp;
pub mod sqlite;
pub mod webhook;

pub use dry_run::DryRunTransport;
pub use file_lock::{FileRunLock, MemoryRunLock};
pub use memory::InMemoryStore;
pub use smtp::{SmtpSettings, SmtpTls, SmtpTransport};
pub use sqlite::{SqliteConfig, SqliteStore};
pub use webhook::WebhookNotifier;
