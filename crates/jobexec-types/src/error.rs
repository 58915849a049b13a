// SPDX-License-Identifier: Apache-2.0

//! Errors shared across the phase execution crates.

use thiserror::Error;

/// Raised by `find_phase_control` when a phase is found by id but its type
/// does not match the caller's expectation (§4.1).
#[derive(Debug, Clone, Error)]
#[error("phase '{phase_id}' has unexpected type: expected {expected_type}, got {actual_type}")]
pub struct PhaseTypeMismatch {
    /// Id of the phase that was found.
    pub phase_id: String,
    /// Type the caller expected.
    pub expected_type: String,
    /// Type the phase actually has.
    pub actual_type: String,
}
