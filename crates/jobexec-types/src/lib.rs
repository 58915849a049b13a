// SPDX-License-Identifier: Apache-2.0

//! Data model shared by every phase execution crate: phase identity, run
//! states, termination outcomes, the lifecycle log, and the criteria used
//! to match job instances from the control plane.

pub mod criteria;
pub mod error;
pub mod fault;
pub mod lifecycle;
pub mod phase;

pub use criteria::JobRunCriteria;
pub use error::PhaseTypeMismatch;
pub use fault::Fault;
pub use lifecycle::{Lifecycle, PhaseRun, PhaseUpdateEvent, Stage};
pub use phase::{PhaseId, RunState, TerminationInfo, TerminationStatus};
