// SPDX-License-Identifier: Apache-2.0

//! [`NoOverlapPhase`]: a named mutual-exclusion gate. Completes only if no
//! other currently active instance holds the same `no_overlap_id`
//! protection tag.

use jobexec_engine::{BasePhase, NoopControl, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext};
use jobexec_types::{PhaseId, RunState, TerminationStatus};
use std::sync::Arc;

use crate::config::NoOverlapConfig;
use crate::lock::NamedFileLock;
use crate::registry::ActiveRunRegistry;

struct NoOverlapBehavior {
    no_overlap_id: String,
    registry: Arc<dyn ActiveRunRegistry>,
    lock: Arc<dyn NamedFileLock>,
}

impl PhaseBehavior for NoOverlapBehavior {
    fn run_state(&self) -> RunState {
        RunState::Evaluating
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        Arc::new(NoopControl)
    }

    fn stop_status(&self) -> TerminationStatus {
        TerminationStatus::Cancelled
    }

    fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
        let lock_name = format!("noo-{}", self.no_overlap_id);
        let guard = match self.lock.acquire(&lock_name) {
            Ok(guard) => guard,
            Err(err) => {
                tracing::error!(error = %err, "failed to acquire no-overlap lock");
                return PhaseOutcome::Failed(jobexec_types::Fault::from_message(
                    "NO_OVERLAP_LOCK_ERROR",
                    err.to_string(),
                ));
            }
        };
        let tag = format!("no_overlap:{}", self.no_overlap_id);
        let overlap = self.registry.active_runs().iter().any(|run| run.has_protection_tag(&tag));
        drop(guard);
        if overlap {
            tracing::debug!(no_overlap_id = %self.no_overlap_id, "overlap found");
            PhaseOutcome::Terminated(TerminationStatus::Overlap, None)
        } else {
            PhaseOutcome::Completed
        }
    }

    fn stop(&self) {}
}

/// Completes only if no other active instance currently holds the same
/// `no_overlap_id` protection tag; otherwise terminates `OVERLAP`.
pub struct NoOverlapPhase;

impl NoOverlapPhase {
    /// Builds a no-overlap phase guarding `config.no_overlap_id`, serialized
    /// against other processes via `lock`.
    #[must_use]
    pub fn new(id: PhaseId, config: NoOverlapConfig, registry: Arc<dyn ActiveRunRegistry>, lock: Arc<dyn NamedFileLock>) -> BasePhase {
        BasePhase::new(
            id,
            Box::new(NoOverlapBehavior {
                no_overlap_id: config.no_overlap_id,
                registry,
                lock,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FlockNamedLock;
    use crate::registry::ActiveRun;
    use chrono::Utc;
    use jobexec_engine::Phase;

    struct FakeRegistry(Vec<ActiveRun>);

    impl ActiveRunRegistry for FakeRegistry {
        fn active_runs(&self) -> Vec<ActiveRun> {
            self.0.clone()
        }

        fn signal_dispatch(&self, _instance_id: &str) -> bool {
            false
        }
    }

    #[test]
    fn completes_with_no_conflicting_active_run() {
        let dir = tempfile::tempdir().unwrap();
        let lock: Arc<dyn NamedFileLock> = Arc::new(FlockNamedLock::new(dir.path().to_path_buf()));
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(Vec::new()));
        let phase = NoOverlapPhase::new(PhaseId::new("noo", "NO_OVERLAP"), NoOverlapConfig::new("nightly-etl"), registry, lock);
        assert!(phase.run(&RunContext).is_completed());
    }

    #[test]
    fn reports_overlap_when_another_run_holds_the_same_tag() {
        let dir = tempfile::tempdir().unwrap();
        let lock: Arc<dyn NamedFileLock> = Arc::new(FlockNamedLock::new(dir.path().to_path_buf()));
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(vec![ActiveRun {
            instance_id: "other".to_string(),
            created_at: Utc::now(),
            attributes: Default::default(),
            protection_tags: vec!["no_overlap:nightly-etl".to_string()],
            in_queue: false,
            executing: true,
        }]));
        let phase = NoOverlapPhase::new(PhaseId::new("noo", "NO_OVERLAP"), NoOverlapConfig::new("nightly-etl"), registry, lock);
        assert_eq!(phase.run(&RunContext).status, TerminationStatus::Overlap);
    }
}
