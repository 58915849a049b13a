// SPDX-License-Identifier: Apache-2.0

//! [`ActiveRunRegistry`]: the narrow view of the fleet of concurrently
//! active job instances that [`crate::NoOverlapPhase`],
//! [`crate::DependencyPhase`], and [`crate::ExecutionQueue`] need. A real
//! deployment implements this over whatever cross-process discovery
//! mechanism it has (the control-plane socket directory, a shared store);
//! this crate only depends on the trait.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// A snapshot of one other active job instance, as seen by a coordination
/// phase evaluating a predicate over the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    /// The instance's id.
    pub instance_id: String,
    /// When the instance's run was created.
    pub created_at: DateTime<Utc>,
    /// The instance's free-form attributes, matched by [`jobexec_types::JobRunCriteria`].
    pub attributes: HashMap<String, String>,
    /// Protection tags the instance currently holds, e.g.
    /// `"no_overlap:nightly-etl"` or `"execution_queue:build-workers"`.
    pub protection_tags: Vec<String>,
    /// Whether the instance is currently queued behind an execution queue.
    pub in_queue: bool,
    /// Whether the instance is currently executing.
    pub executing: bool,
}

impl ActiveRun {
    /// Whether this run currently holds the given protection tag.
    #[must_use]
    pub fn has_protection_tag(&self, tag: &str) -> bool {
        self.protection_tags.iter().any(|t| t == tag)
    }
}

/// Keeps a protection-tag watch registered; dropping it cancels the
/// subscription, since the registry holds only a weak reference to the
/// callback it wraps.
pub struct ProtectionWatch(#[allow(dead_code)] Arc<dyn Fn() + Send + Sync>);

impl ProtectionWatch {
    #[must_use]
    pub fn new(callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self(callback)
    }
}

/// Read/write access to the fleet of currently active job instances.
pub trait ActiveRunRegistry: Send + Sync {
    /// Snapshots every instance the registry currently considers active.
    fn active_runs(&self) -> Vec<ActiveRun>;

    /// Requests that the instance identified by `instance_id`, if it is
    /// queued and not already dequeued, be dispatched now. Returns whether
    /// the request was accepted.
    fn signal_dispatch(&self, instance_id: &str) -> bool;

    /// Starts a transition listener scoped to `tag`: `on_departure` is
    /// invoked each time some other active run holding `tag` leaves its
    /// protected phase. The returned [`ProtectionWatch`] must be held for
    /// as long as the caller wants to keep listening.
    ///
    /// The default implementation never calls back; a registry with no
    /// cross-instance visibility (e.g. a test double) can rely on
    /// [`ActiveRunRegistry::signal_dispatch`] alone.
    fn watch_protection_tag(&self, _tag: &str, on_departure: Arc<dyn Fn() + Send + Sync>) -> ProtectionWatch {
        ProtectionWatch::new(on_departure)
    }
}
