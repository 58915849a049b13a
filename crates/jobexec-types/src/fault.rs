// SPDX-License-Identifier: Apache-2.0

//! [`Fault`], the structured record of an underlying failure carried by a
//! non-`COMPLETED` [`crate::TerminationInfo`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured failure captured from an underlying Rust error, with enough
/// context to report through the control plane without exposing the
/// original error type across the phase boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Coarse classification, e.g. `"UNCAUGHT_PHASE_RUN_EXCEPTION"`.
    pub category: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// Best-effort backtrace, if one was available when the fault was built.
    pub stack: Option<String>,
}

impl Fault {
    /// Builds a fault from an arbitrary error under the given category.
    pub fn from_error(category: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            category: category.into(),
            message: error.to_string(),
            stack: None,
        }
    }

    /// Builds a fault from a free-form message, with no underlying error.
    pub fn from_message(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attaches a captured backtrace/stack rendering to this fault.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}
