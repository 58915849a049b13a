// SPDX-License-Identifier: Apache-2.0

//! [`Phaser`]: the single-driver-thread state machine that primes, runs,
//! and can be stopped out of band from a phase tree, recording every
//! transition into a [`Lifecycle`].

use chrono::Utc;
use jobexec_types::{Lifecycle, PhaseRun, TerminationInfo, TerminationStatus};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::composite::{InitPhase, TerminalPhase};
use crate::error::InvalidState;
use crate::phase::{Phase, RunContext};

/// Called after every phase transition with the previous and current
/// [`PhaseRun`] and the number of phases entered so far.
pub type TransitionHook = dyn Fn(Option<&PhaseRun>, Option<&PhaseRun>, usize) + Send + Sync;

struct State {
    lifecycle: Lifecycle,
    started: bool,
    primed: bool,
    stop_status: Option<TerminationStatus>,
    termination_info: Option<TerminationInfo>,
    current_phase: Option<Arc<dyn Phase>>,
}

/// Drives a fixed sequence of phases from first to last (or to the first
/// non-`COMPLETED` termination), under a condvar-guarded state machine so
/// `stop()` and `wait_for_transition()` can be called from any thread while
/// `run()` is in progress on the driver thread.
pub struct Phaser {
    phases: Vec<Arc<dyn Phase>>,
    terminal: Arc<dyn Phase>,
    guard: Mutex<State>,
    cv: Condvar,
    transition_hook: Mutex<Option<Box<TransitionHook>>>,
}

impl Phaser {
    /// Builds a phaser over `phases`, run in declaration order. Fails if
    /// two phases share an id.
    pub fn new(phases: Vec<Arc<dyn Phase>>) -> Result<Self, DuplicatePhaseId> {
        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.id().id.clone()) {
                return Err(DuplicatePhaseId(phase.id().id.clone()));
            }
        }
        Ok(Self {
            phases,
            terminal: Arc::new(TerminalPhase::new()),
            guard: Mutex::new(State {
                lifecycle: Lifecycle::new(),
                started: false,
                primed: false,
                stop_status: None,
                termination_info: None,
                current_phase: None,
            }),
            cv: Condvar::new(),
            transition_hook: Mutex::new(None),
        })
    }

    /// Installs a callback fired (off the lock) after every recorded
    /// transition, including priming and the final terminal transition.
    pub fn set_transition_hook(&self, hook: Box<TransitionHook>) {
        *self.transition_hook.lock().expect("phaser transition hook poisoned") = Some(hook);
    }

    /// Enters the init sentinel, making the phaser ready for `run()`.
    /// A no-op if `stop()` already aborted the phaser before priming.
    pub fn prime(&self) {
        {
            let mut state = self.guard.lock().expect("phaser state poisoned");
            if state.primed || state.termination_info.is_some() {
                return;
            }
            state.primed = true;
            let init: Arc<dyn Phase> = Arc::new(InitPhase::new());
            state
                .lifecycle
                .add_phase_run(PhaseRun::new(init.id().id.clone(), init.run_state(), Utc::now()));
            state.current_phase = Some(init);
            self.cv.notify_all();
        }
        self.fire_transition_hook();
    }

    /// Runs every phase in order until one fails to complete, `stop()` is
    /// called, or all phases complete. Returns the phaser's own final
    /// termination. A phase that terminates with `FAILED` (an uncaught
    /// error, as opposed to an intentional non-`COMPLETED` outcome) is
    /// reported as the phaser's own `ERROR`, carrying the same fault.
    pub fn run(&self, ctx: &RunContext) -> Result<TerminationInfo, InvalidState> {
        {
            let mut state = self.guard.lock().expect("phaser state poisoned");
            if !state.primed {
                return Err(InvalidState::NotPrimed);
            }
            if state.started {
                return Err(InvalidState::AlreadyStarted);
            }
            if let Some(term) = &state.termination_info {
                return Ok(term.clone());
            }
            state.started = true;
        }

        let mut captured: Option<TerminationInfo> = None;
        for phase in &self.phases {
            {
                let mut state = self.guard.lock().expect("phaser state poisoned");
                if state.termination_info.is_some() || state.stop_status.is_some() {
                    break;
                }
                state
                    .lifecycle
                    .add_phase_run(PhaseRun::new(phase.id().id.clone(), phase.run_state(), Utc::now()));
                state.current_phase = Some(phase.clone());
                self.cv.notify_all();
            }
            self.fire_transition_hook();

            let term = phase.run(ctx);
            if !term.is_completed() {
                captured = Some(Self::termination_for_phaser(&term));
                break;
            }
        }

        let final_term = {
            let mut state = self.guard.lock().expect("phaser state poisoned");
            let term = if let Some(stop_status) = state.stop_status {
                TerminationInfo::new(stop_status, Utc::now())
            } else {
                captured.unwrap_or_else(|| TerminationInfo::new(TerminationStatus::Completed, Utc::now()))
            };
            state.termination_info = Some(term.clone());
            state.current_phase = Some(self.terminal.clone());
            state
                .lifecycle
                .add_phase_run(PhaseRun::new("terminal", self.terminal.run_state(), term.terminated_at));
            self.cv.notify_all();
            term
        };
        self.fire_transition_hook();
        Ok(final_term)
    }

    /// Requests early termination. Idempotent. If called before `run()`
    /// has started, finalizes the phaser immediately with the stop status
    /// of whatever phase is currently current (the init sentinel if not
    /// yet primed past that point).
    pub fn stop(&self) {
        let mut to_stop = None;
        let mut fire_hook = false;
        {
            let mut state = self.guard.lock().expect("phaser state poisoned");
            if state.termination_info.is_some() {
                return;
            }
            let stop_status = state
                .current_phase
                .as_ref()
                .map_or(TerminationStatus::Stopped, |p| p.stop_status());
            state.stop_status = Some(stop_status);
            if !state.started {
                state.termination_info = Some(TerminationInfo::new(stop_status, Utc::now()));
                state.current_phase = Some(self.terminal.clone());
                state
                    .lifecycle
                    .add_phase_run(PhaseRun::new("terminal", self.terminal.run_state(), Utc::now()));
                fire_hook = true;
            }
            self.cv.notify_all();
            to_stop = state.current_phase.clone();
        }
        if let Some(phase) = to_stop {
            phase.stop();
        }
        if fire_hook {
            self.fire_transition_hook();
        }
    }

    /// Blocks until some recorded transition matches `phase_id` and/or
    /// `run_state` (either selector alone is sufficient; both `None`
    /// returns as soon as any transition at all has been recorded), or
    /// `timeout` elapses. Returns whether a match was observed.
    pub fn wait_for_transition(
        &self,
        phase_id: Option<&str>,
        run_state: Option<jobexec_types::RunState>,
        timeout: Option<Duration>,
    ) -> bool {
        let mut state = self.guard.lock().expect("phaser state poisoned");
        loop {
            if phase_id.is_none() && run_state.is_none() {
                if state.lifecycle.phase_count() > 0 {
                    return true;
                }
            } else if state.lifecycle.any_matches(phase_id, run_state) {
                return true;
            }
            let Some(t) = timeout else {
                state = self.cv.wait(state).expect("phaser state poisoned");
                continue;
            };
            let (guard, result) = self.cv.wait_timeout(state, t).expect("phaser state poisoned");
            state = guard;
            if result.timed_out() {
                return false;
            }
        }
    }

    /// The phaser's own termination, once `run()` has finished (or `stop()`
    /// aborted it before it started).
    #[must_use]
    pub fn termination_info(&self) -> Option<TerminationInfo> {
        self.guard.lock().expect("phaser state poisoned").termination_info.clone()
    }

    /// A clone of the lifecycle log recorded so far.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.guard.lock().expect("phaser state poisoned").lifecycle.clone()
    }

    fn termination_for_phaser(phase_term: &TerminationInfo) -> TerminationInfo {
        if phase_term.status == TerminationStatus::Failed {
            TerminationInfo::with_fault(
                TerminationStatus::Error,
                phase_term.terminated_at,
                phase_term.fault.clone().expect("FAILED termination always carries a fault"),
            )
        } else {
            phase_term.clone()
        }
    }

    fn fire_transition_hook(&self) {
        let (previous, current, count) = {
            let state = self.guard.lock().expect("phaser state poisoned");
            (
                state.lifecycle.previous_run().cloned(),
                state.lifecycle.current_run().cloned(),
                state.lifecycle.phase_count(),
            )
        };
        let hook_guard = self.transition_hook.lock().expect("phaser transition hook poisoned");
        let Some(hook) = hook_guard.as_ref() else {
            return;
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(previous.as_ref(), current.as_ref(), count)));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            tracing::warn!(panic = %message, "phaser transition hook panicked; continuing");
        }
    }
}

/// Two phases in the same [`Phaser`] shared an id.
#[derive(Debug, Clone, thiserror::Error)]
#[error("duplicate phase id: {0}")]
pub struct DuplicatePhaseId(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{BasePhase, PhaseBehavior, PhaseOutcome};
    use crate::phase::{NoopControl, PhaseControl};
    use jobexec_types::{Fault, PhaseId, RunState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        outcome: Mutex<Option<PhaseOutcome>>,
    }

    impl PhaseBehavior for Scripted {
        fn run_state(&self) -> RunState {
            RunState::Executing
        }

        fn control(&self) -> Arc<dyn PhaseControl> {
            Arc::new(NoopControl)
        }

        fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
            self.outcome.lock().unwrap().take().expect("run called twice")
        }

        fn stop(&self) {}
    }

    fn scripted(id: &str, outcome: PhaseOutcome) -> Arc<dyn Phase> {
        Arc::new(BasePhase::new(
            PhaseId::new(id, "TEST"),
            Box::new(Scripted {
                outcome: Mutex::new(Some(outcome)),
            }),
        ))
    }

    #[test]
    fn full_success_run_completes_through_every_phase() {
        let a = scripted("a", PhaseOutcome::Completed);
        let b = scripted("b", PhaseOutcome::Completed);
        let phaser = Phaser::new(vec![a, b]).unwrap();
        phaser.prime();
        let term = phaser.run(&RunContext).unwrap();
        assert!(term.is_completed());
        assert_eq!(phaser.lifecycle().phase_count(), 4); // init, a, b, terminal
    }

    #[test]
    fn failed_phase_reports_error_at_the_phaser_level() {
        let a = scripted("a", PhaseOutcome::Completed);
        let b = scripted(
            "b",
            PhaseOutcome::Failed(Fault::from_message("UNCAUGHT_PHASE_RUN_EXCEPTION", "boom")),
        );
        let c = scripted("c", PhaseOutcome::Completed);
        let phaser = Phaser::new(vec![a, b, c.clone()]).unwrap();
        phaser.prime();
        let term = phaser.run(&RunContext).unwrap();
        assert_eq!(term.status, TerminationStatus::Error);
        assert!(term.fault.is_some());
        assert!(c.started_at().is_none());
    }

    #[test]
    fn intentional_termination_status_propagates_unchanged() {
        let a = scripted("a", PhaseOutcome::Terminated(TerminationStatus::Cancelled, None));
        let phaser = Phaser::new(vec![a]).unwrap();
        phaser.prime();
        let term = phaser.run(&RunContext).unwrap();
        assert_eq!(term.status, TerminationStatus::Cancelled);
    }

    #[test]
    fn duplicate_phase_ids_are_rejected_at_construction() {
        let a = scripted("dup", PhaseOutcome::Completed);
        let b = scripted("dup", PhaseOutcome::Completed);
        assert!(Phaser::new(vec![a, b]).is_err());
    }

    #[test]
    fn run_before_prime_fails() {
        let a = scripted("a", PhaseOutcome::Completed);
        let phaser = Phaser::new(vec![a]).unwrap();
        assert!(matches!(phaser.run(&RunContext), Err(InvalidState::NotPrimed)));
    }

    #[test]
    fn stop_before_start_finalizes_without_running_any_phase() {
        let a = scripted("a", PhaseOutcome::Completed);
        let phaser = Phaser::new(vec![a]).unwrap();
        phaser.prime();
        phaser.stop();
        assert_eq!(phaser.termination_info().unwrap().status, TerminationStatus::Stopped);
    }

    #[test]
    fn wait_for_transition_observes_a_phase_entering() {
        let a = scripted("a", PhaseOutcome::Completed);
        let phaser = Arc::new(Phaser::new(vec![a]).unwrap());
        phaser.prime();
        let waiter = phaser.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_transition(Some("a"), None, Some(Duration::from_secs(5))));
        phaser.run(&RunContext).unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn transition_hook_runs_on_every_transition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let a = scripted("a", PhaseOutcome::Completed);
        let phaser = Phaser::new(vec![a]).unwrap();
        phaser.set_transition_hook(Box::new(move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        phaser.prime();
        phaser.run(&RunContext).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3); // init, a, terminal
    }
}
