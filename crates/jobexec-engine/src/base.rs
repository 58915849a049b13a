// SPDX-License-Identifier: Apache-2.0

//! [`BasePhase`]: the canonical lifecycle wrapper every non-delegating phase
//! is built from. It owns identity, timestamps, and the observer registry,
//! and delegates the actual work to a [`PhaseBehavior`].

use chrono::Utc;
use jobexec_types::{Fault, PhaseId, RunState, Stage, TerminationInfo, TerminationStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::observer::{ObserverRegistry, PhaseObserver};
use crate::phase::{Phase, PhaseControl, RunContext};

/// The outcome a [`PhaseBehavior::run`] reports to its wrapping
/// [`BasePhase`]. This is the sum type that stands in for the exception
/// hierarchy a dynamically-typed implementation would use to unwind a
/// phase's run early: an intentional non-`COMPLETED` termination is a value,
/// not a panic.
pub enum PhaseOutcome {
    /// The phase ran to completion.
    Completed,
    /// The phase terminated early and intentionally (stopped, cancelled,
    /// a condition was not satisfied, an approval timed out, ...).
    Terminated(TerminationStatus, Option<Fault>),
    /// The phase's logic hit an error it was not designed to handle.
    Failed(Fault),
}

/// The work a [`BasePhase`] wraps: identity (`run_state`, `children`,
/// `control`) plus the lifecycle body (`run`, `stop`).
pub trait PhaseBehavior: Send + Sync {
    /// This phase's current run state, independent of the wrapper's own
    /// started/ended bookkeeping.
    fn run_state(&self) -> RunState;

    /// Child phases, in declaration order.
    fn children(&self) -> &[Arc<dyn Phase>] {
        &[]
    }

    /// This phase's remote-control surface.
    fn control(&self) -> Arc<dyn PhaseControl>;

    /// The termination status reported if `stop()` preempts this phase.
    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Stopped
    }

    /// Does the phase's actual work.
    fn run(&self, ctx: &RunContext) -> PhaseOutcome;

    /// Requests early termination of the in-progress `run`.
    fn stop(&self);
}

struct CoreState {
    started_at: Option<chrono::DateTime<Utc>>,
    termination: Option<TerminationInfo>,
}

/// Wraps a [`PhaseBehavior`] with the bookkeeping every phase needs:
/// identity, construction/start timestamps, a set-once termination, and an
/// observer registry fired at the `RUNNING` and `ENDED` edges of `run()`.
pub struct BasePhase {
    id: PhaseId,
    name: Option<String>,
    attributes: HashMap<String, String>,
    created_at: chrono::DateTime<Utc>,
    state: Mutex<CoreState>,
    observers: Arc<ObserverRegistry>,
    behavior: Box<dyn PhaseBehavior>,
}

impl BasePhase {
    /// Wraps `behavior` in the standard lifecycle, under the given identity.
    pub fn new(id: PhaseId, behavior: Box<dyn PhaseBehavior>) -> Self {
        Self::with_observers(id, behavior, Arc::new(ObserverRegistry::new()))
    }

    /// Wraps `behavior` the same way as [`BasePhase::new`], but shares
    /// `observers` with the caller instead of allocating a fresh registry —
    /// used by composite phases that need to relay their children's updates
    /// into the same registry their own `RUNNING`/`ENDED` edges dispatch
    /// into.
    pub fn with_observers(id: PhaseId, behavior: Box<dyn PhaseBehavior>, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            id,
            name: None,
            attributes: HashMap::new(),
            created_at: Utc::now(),
            state: Mutex::new(CoreState {
                started_at: None,
                termination: None,
            }),
            observers,
            behavior,
        }
    }

    /// Attaches a human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a free-form attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Phase for BasePhase {
    fn id(&self) -> &PhaseId {
        &self.id
    }

    fn run_state(&self) -> RunState {
        let state = self.state.lock().expect("phase state poisoned");
        if state.termination.is_some() {
            RunState::Ended
        } else {
            self.behavior.run_state()
        }
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        self.behavior.children()
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.behavior.control()
    }

    fn created_at(&self) -> chrono::DateTime<Utc> {
        self.created_at
    }

    fn started_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.state.lock().expect("phase state poisoned").started_at
    }

    fn termination(&self) -> Option<TerminationInfo> {
        self.state.lock().expect("phase state poisoned").termination.clone()
    }

    fn stop_status(&self) -> TerminationStatus {
        self.behavior.stop_status()
    }

    fn run(&self, ctx: &RunContext) -> TerminationInfo {
        let started_at = Utc::now();
        {
            let mut state = self.state.lock().expect("phase state poisoned");
            debug_assert!(state.started_at.is_none(), "phase run() called more than once");
            state.started_at = Some(started_at);
        }
        self.observers
            .dispatch(&jobexec_types::PhaseUpdateEvent::new(self.detail(), Stage::Running, started_at));

        let outcome = self.behavior.run(ctx);

        let terminated_at = Utc::now();
        let termination = match outcome {
            PhaseOutcome::Completed => TerminationInfo::new(TerminationStatus::Completed, terminated_at),
            PhaseOutcome::Terminated(status, Some(fault)) => TerminationInfo::with_fault(status, terminated_at, fault),
            PhaseOutcome::Terminated(status, None) => TerminationInfo::new(status, terminated_at),
            PhaseOutcome::Failed(fault) => TerminationInfo::with_fault(TerminationStatus::Failed, terminated_at, fault),
        };

        {
            let mut state = self.state.lock().expect("phase state poisoned");
            debug_assert!(state.termination.is_none(), "phase termination set more than once");
            state.termination = Some(termination.clone());
        }
        self.observers
            .dispatch(&jobexec_types::PhaseUpdateEvent::new(self.detail(), Stage::Ended, terminated_at));

        termination
    }

    fn stop(&self) {
        self.behavior.stop();
    }

    fn add_phase_observer(&self, observer: Arc<dyn PhaseObserver>, priority: i32, replay_last_update: bool) {
        self.observers.add(observer.clone(), priority);
        if !replay_last_update {
            return;
        }
        let stage_and_at = {
            let state = self.state.lock().expect("phase state poisoned");
            match (&state.termination, state.started_at) {
                (Some(term), _) => Some((Stage::Ended, term.terminated_at)),
                (None, Some(started_at)) => Some((Stage::Running, started_at)),
                (None, None) => None,
            }
        };
        if let Some((stage, at)) = stage_and_at {
            observer.on_phase_update(&jobexec_types::PhaseUpdateEvent::new(self.detail(), stage, at));
        }
    }

    fn remove_phase_observer(&self, observer: &Arc<dyn PhaseObserver>) {
        self.observers.remove(observer);
    }
}
