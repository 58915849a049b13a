// SPDX-License-Identifier: Apache-2.0

//! [`RuntimeConfig`]: the small, explicit configuration surface this crate
//! exposes. Nothing here reads from disk or environment; the embedding
//! process constructs one and passes it to [`crate::Runtime::new`].

use std::path::PathBuf;
use std::time::Duration;

/// Where the runtime keeps its control socket and discovers event
/// listeners, and how permissive that socket is.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory holding the control socket and discoverable
    /// `.tlistener`/`.olistener` files.
    pub runtime_dir: PathBuf,
    /// Unix file mode applied to the control socket once bound.
    pub socket_file_mode: u32,
    /// How often the control socket's accept loop polls for new
    /// connections while idle.
    pub accept_poll_interval: Duration,
}

impl RuntimeConfig {
    /// Builds a config rooted at `runtime_dir`, with the socket locked down
    /// to owner-only access and a responsive accept-loop poll interval.
    #[must_use]
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            socket_file_mode: 0o600,
            accept_poll_interval: Duration::from_millis(20),
        }
    }
}
