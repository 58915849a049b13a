// SPDX-License-Identifier: Apache-2.0

//! The [`Phase`] contract every node in a phase tree implements, and the
//! serializable [`PhaseDetail`] snapshot taken of it.

use jobexec_types::{PhaseId, PhaseTypeMismatch, RunState, TerminationInfo, TerminationStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PhaseOpError;
use crate::observer::PhaseObserver;

/// Data threaded through a run of the phase tree. Currently empty: the
/// coordination and control crates attach what they need (active-run
/// registries, output sinks) by construction rather than through this type.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunContext;

/// A phase-type-specific remote-control surface, invoked by id and
/// operation name from the control plane (`exec_phase_control`, §5).
pub trait PhaseControl: Send + Sync {
    /// Invokes `op_name` with JSON-encoded positional `args`, returning a
    /// JSON-encoded result.
    fn call(&self, op_name: &str, args: &[serde_json::Value]) -> Result<serde_json::Value, PhaseOpError>;
}

/// A [`PhaseControl`] with no operations, used by phases that expose
/// nothing beyond their standard lifecycle (composites, sentinels).
pub struct NoopControl;

impl PhaseControl for NoopControl {
    fn call(&self, op_name: &str, _args: &[serde_json::Value]) -> Result<serde_json::Value, PhaseOpError> {
        Err(PhaseOpError::NotFound(op_name.to_string()))
    }
}

/// A serializable snapshot of a phase and its descendants, returned by
/// `detail()` and carried in [`jobexec_types::PhaseUpdateEvent`]s.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseDetail {
    /// Identity of the phase this snapshot describes.
    pub id: PhaseId,
    /// The phase's run state at snapshot time.
    pub run_state: RunState,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Free-form attributes attached at construction.
    pub attributes: HashMap<String, String>,
    /// When the phase was constructed.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the phase started running, if it has.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// The phase's termination, if it has ended.
    pub termination: Option<TerminationInfo>,
    /// Snapshots of this phase's children, in declaration order.
    pub children: Vec<PhaseDetail>,
}

/// A node in a phase tree: a unit of work (or coordination gate) with a
/// run state, a lifecycle that ends in a [`TerminationInfo`], and an
/// optional set of child phases.
pub trait Phase: Send + Sync {
    /// This phase's identity.
    fn id(&self) -> &PhaseId;

    /// This phase's current run state.
    fn run_state(&self) -> RunState;

    /// Optional human-readable name, defaults to none.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Free-form attributes attached at construction.
    fn attributes(&self) -> &HashMap<String, String>;

    /// Child phases, in declaration order. Empty for leaf phases.
    fn children(&self) -> &[Arc<dyn Phase>];

    /// This phase's remote-control surface.
    fn control(&self) -> Arc<dyn PhaseControl>;

    /// When this phase was constructed.
    fn created_at(&self) -> chrono::DateTime<chrono::Utc>;

    /// When this phase started running, if it has.
    fn started_at(&self) -> Option<chrono::DateTime<chrono::Utc>>;

    /// This phase's termination, if it has ended.
    fn termination(&self) -> Option<TerminationInfo>;

    /// The termination status this phase reports if `stop()` preempts it
    /// before it would otherwise terminate.
    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Stopped
    }

    /// Runs this phase to completion (or to an early, non-`COMPLETED`
    /// termination) and returns its final [`TerminationInfo`].
    fn run(&self, ctx: &RunContext) -> TerminationInfo;

    /// Requests early termination. Idempotent; safe to call from any thread,
    /// including before the phase has started running.
    fn stop(&self);

    /// Registers an observer. If `replay_last_update` is set and this phase
    /// has already started, synchronously delivers the current snapshot to
    /// the new observer before returning.
    fn add_phase_observer(&self, observer: Arc<dyn PhaseObserver>, priority: i32, replay_last_update: bool);

    /// Deregisters every registration of `observer` (by pointer identity).
    fn remove_phase_observer(&self, observer: &Arc<dyn PhaseObserver>);

    /// Builds a serializable snapshot of this phase and its descendants.
    fn detail(&self) -> PhaseDetail {
        PhaseDetail {
            id: self.id().clone(),
            run_state: self.run_state(),
            name: self.name().map(str::to_string),
            attributes: self.attributes().clone(),
            created_at: self.created_at(),
            started_at: self.started_at(),
            termination: self.termination(),
            children: self.children().iter().map(|c| c.detail()).collect(),
        }
    }

    /// Depth-first search for the phase with id `phase_id` among `self` and
    /// its descendants, returning its control surface. If `phase_type` is
    /// given and the matched phase's type differs, fails with
    /// [`PhaseTypeMismatch`] rather than continuing the search.
    fn find_phase_control(
        &self,
        phase_id: &str,
        phase_type: Option<&str>,
    ) -> Result<Option<Arc<dyn PhaseControl>>, PhaseTypeMismatch> {
        if self.id().id == phase_id {
            return checked_control(self.id(), phase_type, self.control());
        }
        for child in self.children() {
            if child.id().id == phase_id {
                return checked_control(child.id(), phase_type, child.control());
            }
            if let Some(found) = child.find_phase_control(phase_id, phase_type)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

fn checked_control(
    id: &PhaseId,
    phase_type: Option<&str>,
    control: Arc<dyn PhaseControl>,
) -> Result<Option<Arc<dyn PhaseControl>>, PhaseTypeMismatch> {
    if let Some(expected) = phase_type {
        if id.phase_type != expected {
            return Err(PhaseTypeMismatch {
                phase_id: id.id.clone(),
                expected_type: expected.to_string(),
                actual_type: id.phase_type.clone(),
            });
        }
    }
    Ok(Some(control))
}
