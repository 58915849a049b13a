// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the engine crate's own control-flow (as opposed to
//! [`jobexec_types::Fault`], which records a phase's *run-time* failure).

use thiserror::Error;

/// A [`Phaser`](crate::Phaser) method was called in a state that does not
/// permit it.
#[derive(Debug, Clone, Copy, Error)]
pub enum InvalidState {
    /// `run()` was called before `prime()`.
    #[error("phaser has not been primed")]
    NotPrimed,
    /// `prime()` or `run()` was called on a phaser that already started.
    #[error("phaser has already started")]
    AlreadyStarted,
}

/// A [`PhaseControl`](crate::PhaseControl) operation failed.
#[derive(Debug, Clone, Error)]
pub enum PhaseOpError {
    /// No operation with this name exists on the target phase.
    #[error("unknown phase control operation '{0}'")]
    NotFound(String),
    /// The operation exists but the supplied arguments were invalid.
    #[error("invalid arguments for phase control operation: {0}")]
    InvalidArgs(String),
}
