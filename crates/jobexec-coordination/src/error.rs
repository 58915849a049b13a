// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the coordination adapters.

use thiserror::Error;

/// Failure acquiring or releasing a named cross-process file lock.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The lock file could not be opened.
    #[error("failed to open lock file {path}: {source}")]
    OpenLockFile {
        /// Path of the lock file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The `flock(2)` call itself failed.
    #[error("failed to acquire lock {name}: {source}")]
    Flock {
        /// Name of the lock that failed to acquire.
        name: String,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },
}
