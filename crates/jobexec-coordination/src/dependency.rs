// SPDX-License-Identifier: Apache-2.0

//! [`DependencyPhase`]: completes only if at least one other active
//! instance satisfies a [`JobRunCriteria`] predicate.

use jobexec_engine::{BasePhase, NoopControl, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext};
use jobexec_types::{JobRunCriteria, PhaseId, RunState, TerminationStatus};
use std::sync::Arc;

use crate::registry::ActiveRunRegistry;

struct DependencyBehavior {
    criteria: JobRunCriteria,
    registry: Arc<dyn ActiveRunRegistry>,
}

impl PhaseBehavior for DependencyBehavior {
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
        let runs = self.registry.active_runs();
        // Evaluated against each candidate's own identity and attributes,
        // not against some surrounding collection's keys: a dependency
        // match is a property of the instance being matched.
        let satisfied = runs.iter().any(|run| self.criteria.matches(&run.instance_id, &run.attributes));
        if satisfied {
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Terminated(TerminationStatus::Unsatisfied, None)
        }
    }

    fn stop(&self) {}
}

/// Completes only if at least one currently active instance matches
/// `criteria`; otherwise terminates `UNSATISFIED`.
pub struct DependencyPhase;

impl DependencyPhase {
    /// Builds a dependency phase checking `criteria` against `registry`.
    #[must_use]
    pub fn new(id: PhaseId, criteria: JobRunCriteria, registry: Arc<dyn ActiveRunRegistry>) -> BasePhase {
        BasePhase::new(id, Box::new(DependencyBehavior { criteria, registry }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActiveRun;
    use chrono::Utc;
    use jobexec_engine::Phase;
    use std::collections::HashMap;

    struct FakeRegistry(Vec<ActiveRun>);

    impl ActiveRunRegistry for FakeRegistry {
        fn active_runs(&self) -> Vec<ActiveRun> {
            self.0.clone()
        }

        fn signal_dispatch(&self, _instance_id: &str) -> bool {
            false
        }
    }

    fn run(instance_id: &str, attrs: &[(&str, &str)]) -> ActiveRun {
        ActiveRun {
            instance_id: instance_id.to_string(),
            created_at: Utc::now(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            protection_tags: Vec::new(),
            in_queue: false,
            executing: true,
        }
    }

    #[test]
    fn completes_when_a_matching_instance_is_active() {
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(vec![run("upstream-1", &[("job", "ingest")])]));
        let criteria = JobRunCriteria::for_instance("upstream-1");
        let phase = DependencyPhase::new(PhaseId::new("dep", "DEPENDENCY"), criteria, registry);
        assert!(phase.run(&RunContext).is_completed());
    }

    #[test]
    fn unsatisfied_when_no_active_instance_matches() {
        let registry: Arc<dyn ActiveRunRegistry> = Arc::new(FakeRegistry(vec![run("other", &[])]));
        let criteria = JobRunCriteria::for_instance("upstream-1");
        let phase = DependencyPhase::new(PhaseId::new("dep", "DEPENDENCY"), criteria, registry);
        assert_eq!(phase.run(&RunContext).status, TerminationStatus::Unsatisfied);
    }
}
