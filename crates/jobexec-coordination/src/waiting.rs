// SPDX-License-Identifier: Apache-2.0

//! [`WaitingPhase`]: blocks on a set of [`ObservableCondition`]s, completing
//! once all are satisfied, terminating `UNSATISFIED` as soon as any one
//! condition reports unsatisfied or an evaluation error, or `TIMEOUT` if
//! none of that happens before the deadline.

use jobexec_engine::{BasePhase, NoopControl, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext};
use jobexec_types::{PhaseId, RunState, TerminationStatus};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::condition::{ConditionListener, ConditionResult, ObservableCondition};

struct WaitingMutexState {
    resolved: bool,
    term_status: Option<TerminationStatus>,
}

struct WaitingCore {
    conditions: Vec<Arc<dyn ObservableCondition>>,
    state: Mutex<WaitingMutexState>,
    cv: Condvar,
}

impl ConditionListener for WaitingCore {
    fn on_result(&self) {
        let mut unsatisfied = false;
        let mut still_pending = false;
        for condition in &self.conditions {
            match condition.result() {
                ConditionResult::None => still_pending = true,
                ConditionResult::Satisfied => {}
                ConditionResult::Unsatisfied | ConditionResult::EvaluationError => {
                    unsatisfied = true;
                    break;
                }
            }
        }
        if unsatisfied || !still_pending {
            let mut state = self.state.lock().expect("waiting state poisoned");
            if unsatisfied {
                state.term_status = Some(TerminationStatus::Unsatisfied);
            }
            state.resolved = true;
            drop(state);
            self.cv.notify_all();
        }
    }
}

impl WaitingCore {
    fn stop_all(&self) {
        for condition in &self.conditions {
            condition.stop();
        }
    }
}

struct WaitingBehavior {
    core: Arc<WaitingCore>,
    timeout: Option<Duration>,
}

impl PhaseBehavior for WaitingBehavior {
    fn run_state(&self) -> RunState {
        RunState::Waiting
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        Arc::new(NoopControl)
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Cancelled
    }

    fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
        let listener: Arc<dyn ConditionListener> = self.core.clone();
        for condition in &self.core.conditions {
            condition.start_evaluation(listener.clone());
        }

        let mut state = self.core.state.lock().expect("waiting state poisoned");
        let timed_out = match self.timeout {
            None => {
                while !state.resolved {
                    state = self.core.cv.wait(state).expect("waiting state poisoned");
                }
                false
            }
            Some(t) => {
                let mut remaining = t;
                loop {
                    if state.resolved {
                        break false;
                    }
                    let wait_started_at = Instant::now();
                    let (guard, result) = self.core.cv.wait_timeout(state, remaining).expect("waiting state poisoned");
                    state = guard;
                    if state.resolved {
                        break false;
                    }
                    if result.timed_out() {
                        break true;
                    }
                    remaining = remaining.saturating_sub(wait_started_at.elapsed());
                }
            }
        };
        let term_status = state.term_status;
        drop(state);

        self.core.stop_all();

        if timed_out {
            return PhaseOutcome::Terminated(TerminationStatus::Timeout, None);
        }
        match term_status {
            Some(status) => PhaseOutcome::Terminated(status, None),
            None => PhaseOutcome::Completed,
        }
    }

    fn stop(&self) {
        self.core.stop_all();
        let mut state = self.core.state.lock().expect("waiting state poisoned");
        state.resolved = true;
        drop(state);
        self.core.cv.notify_all();
    }
}

/// Blocks on a set of [`ObservableCondition`]s until all are satisfied, one
/// reports unsatisfied, or a timeout elapses.
pub struct WaitingPhase;

impl WaitingPhase {
    /// Builds a waiting phase over `conditions`, with an optional timeout.
    #[must_use]
    pub fn new(id: PhaseId, conditions: Vec<Arc<dyn ObservableCondition>>, timeout: Option<Duration>) -> BasePhase {
        BasePhase::new(
            id,
            Box::new(WaitingBehavior {
                core: Arc::new(WaitingCore {
                    conditions,
                    state: Mutex::new(WaitingMutexState {
                        resolved: false,
                        term_status: None,
                    }),
                    cv: Condvar::new(),
                }),
                timeout,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobexec_engine::Phase;
    use std::sync::Mutex as StdMutex;

    struct ManualCondition {
        listener: StdMutex<Option<Arc<dyn ConditionListener>>>,
        result: StdMutex<ConditionResult>,
    }

    impl ManualCondition {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                listener: StdMutex::new(None),
                result: StdMutex::new(ConditionResult::None),
            })
        }

        fn resolve(&self, result: ConditionResult) {
            *self.result.lock().unwrap() = result;
            if let Some(listener) = self.listener.lock().unwrap().as_ref() {
                listener.on_result();
            }
        }
    }

    impl ObservableCondition for ManualCondition {
        fn start_evaluation(&self, listener: Arc<dyn ConditionListener>) {
            *self.listener.lock().unwrap() = Some(listener);
        }

        fn result(&self) -> ConditionResult {
            *self.result.lock().unwrap()
        }

        fn stop(&self) {}
    }

    #[test]
    fn completes_once_every_condition_is_satisfied() {
        let a = ManualCondition::new();
        let b = ManualCondition::new();
        let phase = Arc::new(WaitingPhase::new(
            PhaseId::new("wait", "WAITING"),
            vec![a.clone(), b.clone()],
            Some(Duration::from_secs(5)),
        ));
        let p = phase.clone();
        let handle = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        a.resolve(ConditionResult::Satisfied);
        b.resolve(ConditionResult::Satisfied);
        assert!(handle.join().unwrap().is_completed());
    }

    #[test]
    fn unsatisfied_condition_terminates_immediately() {
        let a = ManualCondition::new();
        let phase = Arc::new(WaitingPhase::new(PhaseId::new("wait", "WAITING"), vec![a.clone()], Some(Duration::from_secs(5))));
        let p = phase.clone();
        let handle = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        a.resolve(ConditionResult::Unsatisfied);
        let term = handle.join().unwrap();
        assert_eq!(term.status, TerminationStatus::Unsatisfied);
    }

    #[test]
    fn timeout_with_no_resolution() {
        let a = ManualCondition::new();
        let phase = WaitingPhase::new(PhaseId::new("wait", "WAITING"), vec![a], Some(Duration::from_millis(20)));
        let term = phase.run(&RunContext);
        assert_eq!(term.status, TerminationStatus::Timeout);
    }
}
