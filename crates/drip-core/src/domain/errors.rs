//! Errors and their operational classification.
//!
//! The orchestrator only needs to know one thing about a failure: retry it
//! within this run, or stop. `ErrorKind` answers that; the variants keep the
//! detail for logs.

use thiserror::Error;

use super::email::EmailStatus;
use super::ids::EmailId;

/// Operational classification of an error.
///
/// - Transient: retry inside the same run (store busy, lock contention timeout)
/// - Permanent: retrying cannot help (bad input, illegal transition)
/// - Infrastructure: the store or host is broken; abort the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum DripError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("illegal status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: EmailId,
        from: EmailStatus,
        to: EmailStatus,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run lock error: {0}")]
    Lock(String),

    #[error("telemetry write failed: {0}")]
    Telemetry(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("run aborted after {attempts} consecutive store failures: {last}")]
    StoreRetriesExhausted { attempts: u32, last: String },
}

impl DripError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DripError::StoreUnavailable(_) => ErrorKind::Transient,
            DripError::Telemetry(_) | DripError::Notify(_) => ErrorKind::Transient,
            DripError::InvalidTransition { .. }
            | DripError::NotFound(_)
            | DripError::Config(_) => ErrorKind::Permanent,
            DripError::Storage(_)
            | DripError::Lock(_)
            | DripError::StoreRetriesExhausted { .. } => ErrorKind::Infrastructure,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<rusqlite::Error> for DripError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                ) =>
            {
                DripError::StoreUnavailable(err.to_string())
            }
            _ => DripError::Storage(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for DripError {
    fn from(err: tokio::task::JoinError) -> Self {
        DripError::Storage(format!("blocking store task failed: {err}"))
    }
}

/// Failure reported by a Transport. Never escapes the send loop: it becomes
/// an `error` row and a `send_error` event.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("delivery timed out")]
    Timeout,

    #[error("inbox misconfigured: {0}")]
    Misconfigured(String),

    #[error("message could not be built: {0}")]
    InvalidMessage(String),
}
