// SPDX-License-Identifier: Apache-2.0

//! [`NamedFileLock`]: a cross-process mutual-exclusion primitive keyed by
//! name, used by [`crate::NoOverlapPhase`] and [`crate::ExecutionQueue`] to
//! serialize their fleet-wide checks against other processes on the same
//! host. [`FlockNamedLock`] implements it with `flock(2)`.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use nix::fcntl::{flock, FlockArg};

use crate::error::CoordinationError;

/// An acquired lock; dropping it releases the lock.
pub trait LockGuard: Send {}

/// Acquires an exclusive, blocking, named cross-process lock.
pub trait NamedFileLock: Send + Sync {
    /// Blocks until the named lock is held, returning a guard that releases
    /// it on drop.
    fn acquire(&self, name: &str) -> Result<Box<dyn LockGuard>, CoordinationError>;
}

/// A [`NamedFileLock`] backed by one `flock(2)`-locked file per name, under
/// a fixed directory.
pub struct FlockNamedLock {
    dir: PathBuf,
}

impl FlockNamedLock {
    /// Builds a lock rooted at `dir`. The directory must already exist.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl NamedFileLock for FlockNamedLock {
    fn acquire(&self, name: &str) -> Result<Box<dyn LockGuard>, CoordinationError> {
        let path = self.dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| CoordinationError::OpenLockFile { path: path.clone(), source })?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(|source| CoordinationError::Flock {
            name: name.to_string(),
            source,
        })?;
        Ok(Box::new(FlockGuard { _file: file }))
    }
}

struct FlockGuard {
    _file: File,
}

impl LockGuard for FlockGuard {}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        let _ = flock(self._file.as_raw_fd(), FlockArg::Unlock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquiring_the_same_name_twice_from_one_process_is_reentrant_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FlockNamedLock::new(dir.path().to_path_buf());
        {
            let _guard = lock.acquire("exq-demo").unwrap();
        }
        let _guard2 = lock.acquire("exq-demo").unwrap();
    }
}
