//! RunLock port: host-scoped, non-blocking mutual exclusion between runs.

use crate::domain::DripError;

/// Held for the whole run. Dropping it releases the lock, which also happens
/// while unwinding from a panic.
pub struct RunLockGuard {
    name: String,
    _held: Box<dyn Send>,
}

impl RunLockGuard {
    pub fn new(name: impl Into<String>, held: Box<dyn Send>) -> Self {
        Self {
            name: name.into(),
            _held: held,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard").field("name", &self.name).finish()
    }
}

pub trait RunLock: Send + Sync {
    /// `Ok(None)` when another holder has it. Never blocks.
    fn try_acquire(&self) -> Result<Option<RunLockGuard>, DripError>;
}
