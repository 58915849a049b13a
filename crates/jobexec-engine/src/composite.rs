// SPDX-License-Identifier: Apache-2.0

//! Composite and sentinel phases built on top of [`Phase`] and
//! [`BasePhase`]: [`SequentialPhase`] runs children in order, [`DelegatingPhase`]
//! and [`WaitWrapperPhase`] forward to an already-lifecycle-managed phase,
//! and [`InitPhase`]/[`TerminalPhase`] frame a [`crate::Phaser`]'s lifecycle log.

use chrono::{DateTime, Utc};
use jobexec_types::{PhaseId, RunState, TerminationInfo, TerminationStatus};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::base::{BasePhase, PhaseBehavior, PhaseOutcome};
use crate::observer::{ObserverRegistry, PhaseObserver};
use crate::phase::{NoopControl, Phase, PhaseControl, PhaseDetail, RunContext};

/// Forwards a child phase's updates into the parent composite's own
/// observer registry, so an observer registered on the composite sees every
/// descendant's transitions, not just the composite's own `RUNNING`/`ENDED`
/// edges.
struct ChildRelay(Arc<ObserverRegistry>);

impl PhaseObserver for ChildRelay {
    fn on_phase_update(&self, event: &jobexec_types::PhaseUpdateEvent<PhaseDetail>) {
        self.0.dispatch(event);
    }
}

/// Runs its children in declaration order, stopping at the first one that
/// does not terminate with `COMPLETED`. That child's termination (status
/// and fault) becomes this phase's own.
pub struct SequentialPhase {
    children: Vec<Arc<dyn Phase>>,
    control: Arc<dyn PhaseControl>,
    state: Mutex<SequentialState>,
}

struct SequentialState {
    current_child: Option<usize>,
    stopped: bool,
}

impl SequentialPhase {
    /// Builds a sequential phase over `children`, wrapped in the standard
    /// lifecycle under `id`. Subscribes to each child's phase-updates and
    /// re-emits them through this phase's own observer set, so an observer
    /// registered on the composite sees every child's transitions too.
    pub fn new(id: PhaseId, children: Vec<Arc<dyn Phase>>) -> BasePhase {
        let observers = Arc::new(ObserverRegistry::new());
        for child in &children {
            child.add_phase_observer(Arc::new(ChildRelay(observers.clone())), 0, false);
        }
        BasePhase::with_observers(
            id,
            Box::new(Self {
                children,
                control: Arc::new(NoopControl),
                state: Mutex::new(SequentialState {
                    current_child: None,
                    stopped: false,
                }),
            }),
            observers,
        )
    }
}

impl PhaseBehavior for SequentialPhase {
    fn run_state(&self) -> RunState {
        RunState::Executing
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        &self.children
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.control.clone()
    }

    fn run(&self, ctx: &RunContext) -> PhaseOutcome {
        struct ResetCurrentChild<'a>(&'a Mutex<SequentialState>);
        impl Drop for ResetCurrentChild<'_> {
            fn drop(&mut self) {
                self.0.lock().expect("sequential state poisoned").current_child = None;
            }
        }
        let _reset = ResetCurrentChild(&self.state);

        for (idx, child) in self.children.iter().enumerate() {
            {
                let mut state = self.state.lock().expect("sequential state poisoned");
                if state.stopped {
                    return PhaseOutcome::Terminated(TerminationStatus::Stopped, None);
                }
                state.current_child = Some(idx);
            }
            let termination = child.run(ctx);
            if !termination.is_completed() {
                return PhaseOutcome::Terminated(termination.status, termination.fault);
            }
        }
        PhaseOutcome::Completed
    }

    fn stop(&self) {
        let current = {
            let mut state = self.state.lock().expect("sequential state poisoned");
            state.stopped = true;
            state.current_child
        };
        if let Some(idx) = current {
            self.children[idx].stop();
        }
    }
}

/// Forwards every [`Phase`] method to an already lifecycle-managed phase.
/// Unlike [`BasePhase`], a `DelegatingPhase` does not wrap `run()` in its
/// own started/ended bookkeeping — the wrapped phase already owns that.
pub struct DelegatingPhase {
    wrapped: Arc<dyn Phase>,
}

impl DelegatingPhase {
    /// Builds a phase that forwards everything to `wrapped`.
    pub fn new(wrapped: Arc<dyn Phase>) -> Self {
        Self { wrapped }
    }
}

impl Phase for DelegatingPhase {
    fn id(&self) -> &PhaseId {
        self.wrapped.id()
    }

    fn run_state(&self) -> RunState {
        self.wrapped.run_state()
    }

    fn name(&self) -> Option<&str> {
        self.wrapped.name()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        self.wrapped.attributes()
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        self.wrapped.children()
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.wrapped.control()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.wrapped.created_at()
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.wrapped.started_at()
    }

    fn termination(&self) -> Option<TerminationInfo> {
        self.wrapped.termination()
    }

    fn stop_status(&self) -> TerminationStatus {
        self.wrapped.stop_status()
    }

    fn run(&self, ctx: &RunContext) -> TerminationInfo {
        self.wrapped.run(ctx)
    }

    fn stop(&self) {
        self.wrapped.stop();
    }

    fn add_phase_observer(&self, observer: Arc<dyn PhaseObserver>, priority: i32, replay_last_update: bool) {
        self.wrapped.add_phase_observer(observer, priority, replay_last_update);
    }

    fn remove_phase_observer(&self, observer: &Arc<dyn PhaseObserver>) {
        self.wrapped.remove_phase_observer(observer);
    }
}

/// A [`DelegatingPhase`] that lets another thread block until this phase's
/// `run()` has actually begun, used by `ExecutionQueue` to release a queued
/// slot only once the admitted execution is underway.
pub struct WaitWrapperPhase {
    wrapped: Arc<dyn Phase>,
    started: Mutex<bool>,
    cv: Condvar,
}

impl WaitWrapperPhase {
    /// Wraps `wrapped`, adding a start latch.
    pub fn new(wrapped: Arc<dyn Phase>) -> Self {
        Self {
            wrapped,
            started: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `run()` has been entered, or `timeout` elapses.
    /// Returns whether the phase had started by the time this call
    /// returned.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut started = self.started.lock().expect("wait wrapper poisoned");
        let Some(mut remaining) = timeout else {
            while !*started {
                started = self.cv.wait(started).expect("wait wrapper poisoned");
            }
            return true;
        };
        loop {
            if *started {
                return true;
            }
            let wait_started_at = Instant::now();
            let (guard, result) = self.cv.wait_timeout(started, remaining).expect("wait wrapper poisoned");
            started = guard;
            if *started {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            remaining = remaining.saturating_sub(wait_started_at.elapsed());
        }
    }
}

impl Phase for WaitWrapperPhase {
    fn id(&self) -> &PhaseId {
        self.wrapped.id()
    }

    fn run_state(&self) -> RunState {
        self.wrapped.run_state()
    }

    fn name(&self) -> Option<&str> {
        self.wrapped.name()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        self.wrapped.attributes()
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        self.wrapped.children()
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.wrapped.control()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.wrapped.created_at()
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.wrapped.started_at()
    }

    fn termination(&self) -> Option<TerminationInfo> {
        self.wrapped.termination()
    }

    fn stop_status(&self) -> TerminationStatus {
        self.wrapped.stop_status()
    }

    fn run(&self, ctx: &RunContext) -> TerminationInfo {
        *self.started.lock().expect("wait wrapper poisoned") = true;
        self.cv.notify_all();
        self.wrapped.run(ctx)
    }

    fn stop(&self) {
        self.wrapped.stop();
    }

    fn add_phase_observer(&self, observer: Arc<dyn PhaseObserver>, priority: i32, replay_last_update: bool) {
        self.wrapped.add_phase_observer(observer, priority, replay_last_update);
    }

    fn remove_phase_observer(&self, observer: &Arc<dyn PhaseObserver>) {
        self.wrapped.remove_phase_observer(observer);
    }
}

/// A no-op sentinel the [`crate::Phaser`] enters before priming its first
/// real phase, fixed at id `"init"`.
pub struct InitPhase {
    id: PhaseId,
    created_at: DateTime<Utc>,
    attributes: HashMap<String, String>,
    control: Arc<dyn PhaseControl>,
}

impl InitPhase {
    /// Builds the init sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: PhaseId::new("init", "INIT"),
            created_at: Utc::now(),
            attributes: HashMap::new(),
            control: Arc::new(NoopControl),
        }
    }
}

impl Default for InitPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl Phase for InitPhase {
    fn id(&self) -> &PhaseId {
        &self.id
    }

    fn run_state(&self) -> RunState {
        RunState::Created
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        &[]
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.control.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn termination(&self) -> Option<TerminationInfo> {
        None
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Stopped
    }

    fn run(&self, _ctx: &RunContext) -> TerminationInfo {
        TerminationInfo::new(TerminationStatus::Completed, Utc::now())
    }

    fn stop(&self) {}

    fn add_phase_observer(&self, _observer: Arc<dyn PhaseObserver>, _priority: i32, _replay_last_update: bool) {}

    fn remove_phase_observer(&self, _observer: &Arc<dyn PhaseObserver>) {}
}

/// A no-op sentinel the [`crate::Phaser`] enters once its last real phase
/// has terminated, fixed at id `"terminal"`.
pub struct TerminalPhase {
    id: PhaseId,
    created_at: DateTime<Utc>,
    attributes: HashMap<String, String>,
    control: Arc<dyn PhaseControl>,
}

impl TerminalPhase {
    /// Builds the terminal sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: PhaseId::new("terminal", "TERMINAL"),
            created_at: Utc::now(),
            attributes: HashMap::new(),
            control: Arc::new(NoopControl),
        }
    }
}

impl Default for TerminalPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl Phase for TerminalPhase {
    fn id(&self) -> &PhaseId {
        &self.id
    }

    fn run_state(&self) -> RunState {
        RunState::Ended
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn children(&self) -> &[Arc<dyn Phase>] {
        &[]
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        self.control.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn termination(&self) -> Option<TerminationInfo> {
        None
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::None
    }

    fn run(&self, _ctx: &RunContext) -> TerminationInfo {
        TerminationInfo::new(TerminationStatus::Completed, Utc::now())
    }

    fn stop(&self) {}

    fn add_phase_observer(&self, _observer: Arc<dyn PhaseObserver>, _priority: i32, _replay_last_update: bool) {}

    fn remove_phase_observer(&self, _observer: &Arc<dyn PhaseObserver>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingBehavior {
        run_state: RunState,
        outcome: Mutex<Option<PhaseOutcome>>,
        control: Arc<dyn PhaseControl>,
        ran: AtomicUsize,
    }

    impl RecordingBehavior {
        fn completed() -> Self {
            Self {
                run_state: RunState::Executing,
                outcome: Mutex::new(Some(PhaseOutcome::Completed)),
                control: Arc::new(NoopControl),
                ran: AtomicUsize::new(0),
            }
        }

        fn terminated(status: TerminationStatus) -> Self {
            Self {
                run_state: RunState::Executing,
                outcome: Mutex::new(Some(PhaseOutcome::Terminated(status, None))),
                control: Arc::new(NoopControl),
                ran: AtomicUsize::new(0),
            }
        }
    }

    impl PhaseBehavior for RecordingBehavior {
        fn run_state(&self) -> RunState {
            self.run_state
        }

        fn control(&self) -> Arc<dyn PhaseControl> {
            self.control.clone()
        }

        fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
            self.ran.fetch_add(1, Ordering::SeqCst);
            self.outcome.lock().unwrap().take().expect("run called twice")
        }

        fn stop(&self) {}
    }

    fn leaf(id: &str, behavior: RecordingBehavior) -> Arc<dyn Phase> {
        Arc::new(BasePhase::new(PhaseId::new(id, "TEST"), Box::new(behavior)))
    }

    #[test]
    fn sequential_phase_stops_at_first_non_completed_child() {
        let a = leaf("a", RecordingBehavior::completed());
        let b = leaf("b", RecordingBehavior::terminated(TerminationStatus::Failed));
        let c = leaf("c", RecordingBehavior::completed());

        let seq = SequentialPhase::new(PhaseId::new("seq", "SEQUENTIAL"), vec![a, b, c.clone()]);
        let term = seq.run(&RunContext);

        assert_eq!(term.status, TerminationStatus::Failed);
        assert!(c.started_at().is_none(), "phase C must not be entered once B fails");
    }

    #[test]
    fn sequential_phase_completes_when_every_child_completes() {
        let a = leaf("a", RecordingBehavior::completed());
        let b = leaf("b", RecordingBehavior::completed());
        let seq = SequentialPhase::new(PhaseId::new("seq", "SEQUENTIAL"), vec![a, b]);
        let term = seq.run(&RunContext);
        assert!(term.is_completed());
    }

    struct RecordingObserver(Mutex<Vec<PhaseId>>);

    impl PhaseObserver for RecordingObserver {
        fn on_phase_update(&self, event: &jobexec_types::PhaseUpdateEvent<PhaseDetail>) {
            self.0.lock().unwrap().push(event.detail.id.clone());
        }
    }

    #[test]
    fn an_observer_on_the_composite_sees_each_childs_transitions() {
        let a = leaf("a", RecordingBehavior::completed());
        let b = leaf("b", RecordingBehavior::completed());
        let a_id = a.id().clone();
        let b_id = b.id().clone();

        let seq = SequentialPhase::new(PhaseId::new("seq", "SEQUENTIAL"), vec![a, b]);
        let seq_id = seq.id().clone();
        let observed = Arc::new(RecordingObserver(Mutex::new(Vec::new())));
        seq.add_phase_observer(observed.clone(), 0, false);
        seq.run(&RunContext);

        let seen = observed.0.lock().unwrap();
        assert!(seen.contains(&a_id), "composite observer missed child A's transitions");
        assert!(seen.contains(&b_id), "composite observer missed child B's transitions");
        assert!(seen.contains(&seq_id), "composite observer missed its own transitions");
    }

    #[test]
    fn wait_wrapper_releases_once_run_begins() {
        let inner = leaf("x", RecordingBehavior::completed());
        let wrapper = Arc::new(WaitWrapperPhase::new(inner));
        let w = wrapper.clone();
        let handle = std::thread::spawn(move || w.run(&RunContext));
        assert!(wrapper.wait(Some(Duration::from_secs(5))));
        handle.join().unwrap();
    }

    #[test]
    fn delegating_phase_forwards_termination() {
        let inner = leaf("y", RecordingBehavior::terminated(TerminationStatus::Cancelled));
        let delegate = DelegatingPhase::new(inner.clone());
        let term = delegate.run(&RunContext);
        assert_eq!(term.status, TerminationStatus::Cancelled);
        assert_eq!(delegate.termination().unwrap().status, TerminationStatus::Cancelled);
    }
}
