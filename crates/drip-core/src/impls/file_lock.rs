//! Host-scoped run locks.
//!
//! `FileRunLock` takes an advisory `flock(LOCK_EX | LOCK_NB)` on a lock file.
//! The kernel drops the lock when the descriptor closes, so a crashed or
//! killed run never leaves it behind. `MemoryRunLock` gives the same
//! semantics inside one process.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::domain::DripError;
use crate::ports::{RunLock, RunLockGuard};

pub struct FileRunLock {
    path: PathBuf,
}

impl FileRunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Open descriptor holding the lock. Closing it releases the lock.
struct HeldFile {
    file: File,
}

#[cfg(unix)]
impl Drop for HeldFile {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `self.file` and still open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// `Ok(false)` when someone else holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and still open.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file run locks need flock(2)",
    ))
}

impl RunLock for FileRunLock {
    fn try_acquire(&self) -> Result<Option<RunLockGuard>, DripError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| DripError::Lock(format!("{}: {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| DripError::Lock(format!("{}: {e}", self.path.display())))?;

        let locked = try_lock_exclusive(&file)
            .map_err(|e| DripError::Lock(format!("{}: {e}", self.path.display())))?;
        if !locked {
            debug!(path = %self.path.display(), "run lock held elsewhere");
            return Ok(None);
        }

        let mut held = HeldFile { file };
        // Holder pid is informational only; a failed write does not matter.
        let _ = held
            .file
            .set_len(0)
            .and_then(|_| writeln!(held.file, "{}", std::process::id()));

        Ok(Some(RunLockGuard::new(
            self.path.display().to_string(),
            Box::new(held),
        )))
    }
}

/// In-process run lock.
#[derive(Clone, Default)]
pub struct MemoryRunLock {
    held: Arc<AtomicBool>,
}

impl MemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

struct MemoryHold {
    held: Arc<AtomicBool>,
}

impl Drop for MemoryHold {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

impl RunLock for MemoryRunLock {
    fn try_acquire(&self) -> Result<Option<RunLockGuard>, DripError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        Ok(Some(RunLockGuard::new(
            "memory",
            Box::new(MemoryHold {
                held: Arc::clone(&self.held),
            }),
        )))
    }
}
