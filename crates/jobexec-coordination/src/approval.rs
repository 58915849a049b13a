// SPDX-License-Identifier: Apache-2.0

//! [`ApprovalPhase`]: blocks until `approve()` is called, `stop()` is
//! called, or a timeout elapses.

use jobexec_engine::{BasePhase, Phase, PhaseBehavior, PhaseControl, PhaseOpError, PhaseOutcome, RunContext};
use jobexec_types::{PhaseId, RunState, TerminationStatus};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct ApprovalState {
    approved: bool,
    stopped: bool,
}

struct ApprovalCore {
    state: Mutex<ApprovalState>,
    cv: Condvar,
}

impl ApprovalCore {
    fn approve(&self) {
        let mut state = self.state.lock().expect("approval state poisoned");
        state.approved = true;
        self.cv.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock().expect("approval state poisoned");
        state.stopped = true;
        self.cv.notify_all();
    }

    /// Whether the gate has been approved and not subsequently stopped.
    ///
    /// The source this phase is modeled on computes this same expression
    /// but never returns it, so the accessor always reported `None`; here
    /// the computed value is the return value.
    fn is_approved(&self) -> bool {
        let state = self.state.lock().expect("approval state poisoned");
        state.approved && !state.stopped
    }

    fn wait(&self, timeout: Option<Duration>) -> ApprovalState {
        let mut state = self.state.lock().expect("approval state poisoned");
        let Some(mut remaining) = timeout else {
            while !state.approved && !state.stopped {
                state = self.cv.wait(state).expect("approval state poisoned");
            }
            return ApprovalState {
                approved: state.approved,
                stopped: state.stopped,
            };
        };
        loop {
            if state.approved || state.stopped {
                break;
            }
            let wait_started_at = Instant::now();
            let (guard, result) = self.cv.wait_timeout(state, remaining).expect("approval state poisoned");
            state = guard;
            if state.approved || state.stopped || result.timed_out() {
                break;
            }
            remaining = remaining.saturating_sub(wait_started_at.elapsed());
        }
        ApprovalState {
            approved: state.approved,
            stopped: state.stopped,
        }
    }
}

struct ApprovalControl {
    core: Arc<ApprovalCore>,
}

impl PhaseControl for ApprovalControl {
    fn call(&self, op_name: &str, _args: &[serde_json::Value]) -> Result<serde_json::Value, PhaseOpError> {
        match op_name {
            "approve" => {
                self.core.approve();
                Ok(serde_json::Value::Null)
            }
            "is_approved" => Ok(serde_json::Value::Bool(self.core.is_approved())),
            other => Err(PhaseOpError::NotFound(other.to_string())),
        }
    }
}

struct ApprovalBehavior {
    core: Arc<ApprovalCore>,
    timeout: Option<Duration>,
}

impl PhaseBehavior for ApprovalBehavior {
    fn run_state(&self) -> RunState {
        RunState::Pending
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        Arc::new(ApprovalControl { core: self.core.clone() })
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Cancelled
    }

    fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
        let result = self.core.wait(self.timeout);
        if result.stopped {
            return PhaseOutcome::Terminated(TerminationStatus::Cancelled, None);
        }
        if !result.approved {
            return PhaseOutcome::Terminated(TerminationStatus::Timeout, None);
        }
        PhaseOutcome::Completed
    }

    fn stop(&self) {
        self.core.stop();
    }
}

/// A manual-approval gate: waits for `approve()` to be called out of band
/// (typically via `exec_phase_control`), timing out after `timeout` if
/// given, or cancelling if `stop()` is called first.
pub struct ApprovalPhase;

impl ApprovalPhase {
    /// Builds an approval phase with no timeout (waits indefinitely).
    #[must_use]
    pub fn new(id: PhaseId) -> BasePhase {
        Self::with_timeout(id, None)
    }

    /// Builds an approval phase that times out after `timeout`.
    #[must_use]
    pub fn with_timeout(id: PhaseId, timeout: Option<Duration>) -> BasePhase {
        BasePhase::new(
            id,
            Box::new(ApprovalBehavior {
                core: Arc::new(ApprovalCore {
                    state: Mutex::new(ApprovalState {
                        approved: false,
                        stopped: false,
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

    #[test]
    fn approving_before_timeout_completes() {
        let phase = Arc::new(ApprovalPhase::with_timeout(PhaseId::new("approval", "APPROVAL"), Some(Duration::from_secs(5))));
        let control = phase.control();
        let p = phase.clone();
        let handle = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        control.call("approve", &[]).unwrap();
        let term = handle.join().unwrap();
        assert!(term.is_completed());
    }

    #[test]
    fn is_approved_reports_the_computed_value() {
        let phase = ApprovalPhase::new(PhaseId::new("approval", "APPROVAL"));
        let control = phase.control();
        assert_eq!(control.call("is_approved", &[]).unwrap(), serde_json::Value::Bool(false));
        control.call("approve", &[]).unwrap();
        assert_eq!(control.call("is_approved", &[]).unwrap(), serde_json::Value::Bool(true));
    }

    #[test]
    fn timeout_without_approval_reports_timeout() {
        let phase = ApprovalPhase::with_timeout(PhaseId::new("approval", "APPROVAL"), Some(Duration::from_millis(20)));
        let term = phase.run(&RunContext);
        assert_eq!(term.status, TerminationStatus::Timeout);
    }

    #[test]
    fn stop_before_approval_cancels() {
        let phase = Arc::new(ApprovalPhase::new(PhaseId::new("approval", "APPROVAL")));
        let p = phase.clone();
        let handle = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        phase.stop();
        let term = handle.join().unwrap();
        assert_eq!(term.status, TerminationStatus::Cancelled);
    }
}
