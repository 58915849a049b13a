// SPDX-License-Identifier: Apache-2.0

//! [`ExecutionQueue`]: admits at most `max_executions` concurrently active
//! instances sharing a `queue_id`, holding the rest in FIFO order behind a
//! file-lock-serialized election each time a slot might have freed up.

use jobexec_engine::{BasePhase, NoopControl, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext};
use jobexec_types::{PhaseId, RunState, TerminationStatus};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::ExecutionQueueConfig;
use crate::lock::NamedFileLock;
use crate::registry::{ActiveRunRegistry, ProtectionWatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueuedState {
    None,
    InQueue,
    Dispatched,
    Cancelled,
}

impl QueuedState {
    fn dequeued(self) -> bool {
        matches!(self, Self::Dispatched | Self::Cancelled)
    }
}

struct QueueGuardState {
    state: QueuedState,
    current_wait: bool,
}

struct ExecutionQueueCore {
    config: ExecutionQueueConfig,
    registry: Arc<dyn ActiveRunRegistry>,
    lock: Arc<dyn NamedFileLock>,
    guard: Mutex<QueueGuardState>,
    cv: Condvar,
}

impl ExecutionQueueCore {
    fn protection_tag(&self) -> String {
        format!("execution_queue:{}", self.config.queue_id)
    }

    /// Admits as many queued peers as current capacity allows, in
    /// creation-time order. Called with the cross-process dispatch lock
    /// held.
    fn dispatch_next(&self) {
        let tag = self.protection_tag();
        let mut runs: Vec<_> = self
            .registry
            .active_runs()
            .into_iter()
            .filter(|r| r.has_protection_tag(&tag))
            .collect();
        runs.sort_by_key(|r| r.created_at);

        let executing = runs.iter().filter(|r| r.executing).count();
        let mut free_slots = self.config.max_executions.saturating_sub(executing);
        if free_slots == 0 {
            return;
        }
        for candidate in runs.iter().filter(|r| r.in_queue) {
            if free_slots == 0 {
                break;
            }
            if self.registry.signal_dispatch(&candidate.instance_id) {
                free_slots -= 1;
            }
        }
    }
}

struct ExecutionQueueBehavior {
    core: Arc<ExecutionQueueCore>,
}

impl PhaseBehavior for ExecutionQueueBehavior {
    fn run_state(&self) -> RunState {
        RunState::InQueue
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        Arc::new(NoopControl)
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Cancelled
    }

    fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
        // Becoming a scheduler candidate: listen for peers sharing our
        // protection tag leaving their protected phase, so a capacity-full
        // election is retried instead of only ever waking on an explicit
        // `signal_dispatch`. Held for the duration of the run so it is torn
        // down once this waiter is dequeued.
        let tag = self.core.protection_tag();
        let handle = ExecutionQueueHandle { core: self.core.clone() };
        let _peer_watch: ProtectionWatch = self.core.registry.watch_protection_tag(&tag, Arc::new(move || handle.notify_peer_transition()));

        loop {
            {
                let mut guard = self.core.guard.lock().expect("execution queue state poisoned");
                if guard.state == QueuedState::None {
                    guard.state = QueuedState::InQueue;
                }
                if guard.state.dequeued() {
                    return if guard.state == QueuedState::Cancelled {
                        PhaseOutcome::Terminated(TerminationStatus::Cancelled, None)
                    } else {
                        PhaseOutcome::Completed
                    };
                }
                if guard.current_wait {
                    let _unused = self.core.cv.wait(guard).expect("execution queue state poisoned");
                    continue;
                }
                guard.current_wait = true;
            }

            let lock_name = format!("exq-{}", self.core.config.queue_id);
            match self.core.lock.acquire(&lock_name) {
                Ok(guard) => {
                    self.core.dispatch_next();
                    drop(guard);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to acquire execution queue dispatch lock");
                    return PhaseOutcome::Failed(jobexec_types::Fault::from_message(
                        "EXECUTION_QUEUE_LOCK_ERROR",
                        err.to_string(),
                    ));
                }
            }
        }
    }

    fn stop(&self) {
        let mut guard = self.core.guard.lock().expect("execution queue state poisoned");
        if guard.state.dequeued() {
            return;
        }
        guard.state = QueuedState::Cancelled;
        self.core.cv.notify_all();
    }
}

/// A FIFO admission gate: at most `max_executions` instances sharing a
/// `queue_id` may hold the protection tag concurrently; the rest wait,
/// woken either by [`ExecutionQueue::signal_dispatch`] or
/// [`ExecutionQueue::notify_peer_transition`].
pub struct ExecutionQueue {
    core: Arc<ExecutionQueueCore>,
}

impl ExecutionQueue {
    /// Builds an execution queue phase. `registry` supplies the snapshot of
    /// competing instances and the cross-process dispatch signal; `lock`
    /// serializes the admission decision against other processes.
    #[must_use]
    pub fn new(
        id: PhaseId,
        config: ExecutionQueueConfig,
        registry: Arc<dyn ActiveRunRegistry>,
        lock: Arc<dyn NamedFileLock>,
    ) -> (BasePhase, ExecutionQueueHandle) {
        let core = Arc::new(ExecutionQueueCore {
            config,
            registry,
            lock,
            guard: Mutex::new(QueueGuardState {
                state: QueuedState::None,
                current_wait: false,
            }),
            cv: Condvar::new(),
        });
        let phase = BasePhase::new(id, Box::new(ExecutionQueueBehavior { core: core.clone() }));
        (phase, ExecutionQueueHandle { core })
    }
}

/// An out-of-band handle to a running [`ExecutionQueue`] phase, used by the
/// controller layer to admit this waiter or wake it for a re-election
/// attempt, without needing the phase tree's `dyn Phase` view.
#[derive(Clone)]
pub struct ExecutionQueueHandle {
    core: Arc<ExecutionQueueCore>,
}

impl ExecutionQueueHandle {
    /// Admits this waiter now, if it is still queued. Returns whether the
    /// request took effect.
    pub fn signal_dispatch(&self) -> bool {
        let mut guard = self.core.guard.lock().expect("execution queue state poisoned");
        if guard.state.dequeued() {
            return false;
        }
        guard.state = QueuedState::Dispatched;
        self.core.cv.notify_all();
        true
    }

    /// Wakes this waiter to re-attempt the dispatch election, e.g. because
    /// a peer sharing this queue's protection tag just transitioned out of
    /// it.
    pub fn notify_peer_transition(&self) {
        let mut guard = self.core.guard.lock().expect("execution queue state poisoned");
        if guard.current_wait {
            guard.current_wait = false;
            self.core.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FlockNamedLock;
    use crate::registry::ActiveRun;
    use chrono::Utc;
    use jobexec_engine::Phase;
    use std::time::Duration;

    struct FakeRegistry(Mutex<Vec<ActiveRun>>);

    impl ActiveRunRegistry for FakeRegistry {
        fn active_runs(&self) -> Vec<ActiveRun> {
            self.0.lock().unwrap().clone()
        }

        fn signal_dispatch(&self, _instance_id: &str) -> bool {
            false
        }
    }

    fn run(instance_id: &str, tag: &str, in_queue: bool, executing: bool) -> ActiveRun {
        ActiveRun {
            instance_id: instance_id.to_string(),
            created_at: Utc::now(),
            attributes: Default::default(),
            protection_tags: vec![tag.to_string()],
            in_queue,
            executing,
        }
    }

    #[test]
    fn admits_immediately_when_slots_are_free() {
        let dir = tempfile::tempdir().unwrap();
        let lock: Arc<dyn NamedFileLock> = Arc::new(FlockNamedLock::new(dir.path().to_path_buf()));
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(Mutex::new(vec![run(
            "self",
            "execution_queue:build",
            true,
            false,
        )])));
        let config = ExecutionQueueConfig::new("build", 1);
        let (phase, handle) = ExecutionQueue::new(PhaseId::new("exq", "EXECUTION_QUEUE"), config, registry, lock);
        let phase = Arc::new(phase);
        let p = phase.clone();
        let h = handle.clone();
        let runner = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        h.signal_dispatch();
        assert!(runner.join().unwrap().is_completed());
    }

    #[test]
    fn stop_cancels_a_queued_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let lock: Arc<dyn NamedFileLock> = Arc::new(FlockNamedLock::new(dir.path().to_path_buf()));
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(Mutex::new(Vec::new())));
        let config = ExecutionQueueConfig::new("build", 1);
        let (phase, _handle) = ExecutionQueue::new(PhaseId::new("exq", "EXECUTION_QUEUE"), config, registry, lock);
        let phase = Arc::new(phase);
        let p = phase.clone();
        let runner = std::thread::spawn(move || p.run(&RunContext));
        std::thread::sleep(Duration::from_millis(20));
        phase.stop();
        let term = runner.join().unwrap();
        assert_eq!(term.status, TerminationStatus::Cancelled);
    }
}
