//! Advisory per-domain locking.
//!
//! Nothing in the transaction itself prevents two processes from cloning the
//! same domain at once; `DomainLock` is the opt-in guard the CLI takes
//! before running one. Library callers may do the same or bring their own
//! coordination.

use crate::TransactionError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct DomainLock {
    lock_file: File,
}

impl DomainLock {
    /// Block until the domain's lock is held.
    pub fn acquire(lock_dir: &Path, domain: &str) -> Result<Self, TransactionError> {
        let file = Self::open_lock_file(lock_dir, domain)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }

    /// Take the lock without blocking; contention reports
    /// [`TransactionError::LockBusy`].
    pub fn try_acquire(lock_dir: &Path, domain: &str) -> Result<Self, TransactionError> {
        let file = Self::open_lock_file(lock_dir, domain)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { lock_file: file }),
            Err(_) => Err(TransactionError::LockBusy(domain.to_owned())),
        }
    }

    fn open_lock_file(lock_dir: &Path, domain: &str) -> Result<File, TransactionError> {
        std::fs::create_dir_all(lock_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_dir.join(format!("{domain}.lock")))?;
        Ok(file)
    }
}

impl Drop for DomainLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
