// SPDX-License-Identifier: Apache-2.0

//! Plain, serde-derived configuration for coordination phases. Nothing here
//! reads from disk or environment; the embedding job process constructs
//! these and passes them to the phase constructors.

use serde::{Deserialize, Serialize};

/// Configuration for an [`crate::ExecutionQueue`] phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionQueueConfig {
    /// Identifies the queue; instances sharing a `queue_id` compete for the
    /// same admission slots.
    pub queue_id: String,
    /// Maximum number of instances allowed to execute concurrently within
    /// this queue.
    pub max_executions: usize,
}

impl ExecutionQueueConfig {
    #[must_use]
    pub fn new(queue_id: impl Into<String>, max_executions: usize) -> Self {
        Self {
            queue_id: queue_id.into(),
            max_executions,
        }
    }
}

/// Configuration for a [`crate::NoOverlapPhase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoOverlapConfig {
    /// Identifies the mutual-exclusion group; instances sharing a
    /// `no_overlap_id` may not run concurrently.
    pub no_overlap_id: String,
}

impl NoOverlapConfig {
    #[must_use]
    pub fn new(no_overlap_id: impl Into<String>) -> Self {
        Self { no_overlap_id: no_overlap_id.into() }
    }
}
