// SPDX-License-Identifier: Apache-2.0

//! Phase identity, run states, and termination outcomes (§3 of the data model).

use crate::fault::Fault;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a phase within a single phase tree: unique `id`, plus a
/// `type` used for [`crate::PhaseTypeMismatch`] checks when resolving phase
/// control by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseId {
    /// Unique identifier of the phase within its tree.
    pub id: String,
    /// The phase's type, e.g. `"SEQUENTIAL"`, `"APPROVAL"`, `"EXEC"`.
    pub phase_type: String,
}

impl PhaseId {
    /// Builds a new phase identity.
    pub fn new(id: impl Into<String>, phase_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase_type: phase_type.into(),
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.phase_type)
    }
}

/// Coarse run-state category a phase occupies while alive (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Constructed but not yet entered by the Phaser.
    Created,
    /// Waiting on a manual approval.
    Pending,
    /// Evaluating a fleet-wide predicate (dependency, no-overlap).
    Evaluating,
    /// Blocked on one or more observable conditions.
    Waiting,
    /// Queued behind an execution-queue admission limit.
    InQueue,
    /// Doing the job's actual work.
    Executing,
    /// Terminated; `termination` is set.
    Ended,
    /// No run state applies (sentinel phases).
    None,
}

/// Terminal outcome of a phase or of a whole run (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationStatus {
    /// Ran to completion with no error.
    Completed,
    /// Stopped by an external `stop()` call.
    Stopped,
    /// Cancelled before execution began.
    Cancelled,
    /// Failed due to an uncaught error from phase logic.
    Failed,
    /// Failed due to an error the Phaser itself could not recover from.
    Error,
    /// Interrupted by a process-level signal.
    Interrupted,
    /// Timed out waiting on a condition or approval.
    Timeout,
    /// A no-overlap check found a conflicting active run.
    Overlap,
    /// A dependency or waiting condition was not satisfied.
    Unsatisfied,
    /// No termination has occurred yet (sentinel).
    None,
}

/// `(status, terminated_at, optional fault)` — the terminal outcome of a
/// phase, set exactly once (§3 invariants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationInfo {
    /// The terminal status.
    pub status: TerminationStatus,
    /// When the phase (or run) terminated.
    pub terminated_at: DateTime<Utc>,
    /// The underlying failure, if any.
    pub fault: Option<Fault>,
}

impl TerminationInfo {
    /// Builds a termination info with no fault attached.
    pub fn new(status: TerminationStatus, terminated_at: DateTime<Utc>) -> Self {
        Self {
            status,
            terminated_at,
            fault: None,
        }
    }

    /// Builds a termination info carrying a fault.
    pub fn with_fault(status: TerminationStatus, terminated_at: DateTime<Utc>, fault: Fault) -> Self {
        Self {
            status,
            terminated_at,
            fault: Some(fault),
        }
    }

    /// Whether this termination represents a successful run.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TerminationStatus::Completed
    }
}
