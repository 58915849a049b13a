// SPDX-License-Identifier: Apache-2.0

//! [`InstanceRegistry`]: the process-wide set of currently known
//! [`JobInstance`]s, shared between the control plane, the coordination
//! phases, and the runtime that spawns them.

use jobexec_coordination::{ActiveRun, ActiveRunRegistry, ProtectionWatch};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::instance::JobInstance;

/// Owns the live set of [`JobInstance`]s for one process. Implements
/// [`ActiveRunRegistry`] so coordination phases can evaluate fleet-wide
/// predicates against it directly.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Arc<JobInstance>>>,
    watchers: Mutex<HashMap<String, Vec<Weak<dyn Fn() + Send + Sync>>>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instance: Arc<JobInstance>) {
        self.instances.lock().expect("instance registry poisoned").insert(instance.instance_id().to_string(), instance);
    }

    pub fn remove(&self, instance_id: &str) {
        self.instances.lock().expect("instance registry poisoned").remove(instance_id);
    }

    #[must_use]
    pub fn get(&self, instance_id: &str) -> Option<Arc<JobInstance>> {
        self.instances.lock().expect("instance registry poisoned").get(instance_id).cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<JobInstance>> {
        self.instances.lock().expect("instance registry poisoned").values().cloned().collect()
    }

    /// Wakes every live watcher registered for `tag`, e.g. because the
    /// instance holding it just left its protected phase. Dead watchers
    /// (whose [`ProtectionWatch`] was dropped) are pruned along the way.
    pub fn notify_protection_departure(&self, tag: &str) {
        let mut watchers = self.watchers.lock().expect("watcher registry poisoned");
        if let Some(list) = watchers.get_mut(tag) {
            list.retain(|watcher| match watcher.upgrade() {
                Some(callback) => {
                    callback();
                    true
                }
                None => false,
            });
        }
    }
}

impl ActiveRunRegistry for InstanceRegistry {
    fn active_runs(&self) -> Vec<ActiveRun> {
        self.all()
            .iter()
            .map(|instance| ActiveRun {
                instance_id: instance.instance_id().to_string(),
                created_at: instance.created_at(),
                attributes: instance.attributes().clone(),
                protection_tags: instance.protection_tags().to_vec(),
                in_queue: instance.in_queue(),
                executing: instance.executing(),
            })
            .collect()
    }

    fn signal_dispatch(&self, instance_id: &str) -> bool {
        let Some(instance) = self.get(instance_id) else {
            return false;
        };
        match instance.execution_queue() {
            Some(handle) => handle.signal_dispatch(),
            None => false,
        }
    }

    fn watch_protection_tag(&self, tag: &str, on_departure: Arc<dyn Fn() + Send + Sync>) -> ProtectionWatch {
        self.watchers
            .lock()
            .expect("watcher registry poisoned")
            .entry(tag.to_string())
            .or_default()
            .push(Arc::downgrade(&on_departure));
        ProtectionWatch::new(on_departure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobexec_engine::{BasePhase, Phaser};
    use jobexec_types::PhaseId;

    fn noop_phaser() -> (Arc<dyn jobexec_engine::Phase>, Arc<Phaser>) {
        use jobexec_engine::{NoopControl, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext};

        struct Noop;
        impl PhaseBehavior for Noop {
            fn run_state(&self) -> jobexec_types::RunState {
                jobexec_types::RunState::Executing
            }
            fn control(&self) -> Arc<dyn PhaseControl> {
                Arc::new(NoopControl)
            }
            fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
                PhaseOutcome::Completed
            }
            fn stop(&self) {}
        }

        let phase: Arc<dyn jobexec_engine::Phase> = Arc::new(BasePhase::new(PhaseId::new("root", "TEST"), Box::new(Noop)));
        let phaser = Arc::new(Phaser::new(vec![phase.clone()]).unwrap());
        (phase, phaser)
    }

    #[test]
    fn active_runs_reflects_inserted_instances() {
        let registry = InstanceRegistry::new();
        let (root, phaser) = noop_phaser();
        let instance = Arc::new(JobInstance::new("i1", Default::default(), root, phaser, None, vec!["no_overlap:x".to_string()]));
        registry.insert(instance);
        let runs = registry.active_runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].has_protection_tag("no_overlap:x"));
    }

    #[test]
    fn signal_dispatch_on_unknown_instance_returns_false() {
        let registry = InstanceRegistry::new();
        assert!(!registry.signal_dispatch("missing"));
    }

    #[test]
    fn watch_protection_tag_fires_on_departure_and_stops_once_dropped() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = InstanceRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let callback = fired.clone();
        let watch = registry.watch_protection_tag("execution_queue:build", Arc::new(move || {
            callback.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify_protection_departure("execution_queue:build");
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(watch);
        registry.notify_protection_departure("execution_queue:build");
        assert_eq!(fired.load(Ordering::SeqCst), 1, "dropped watch must not fire again");
    }
}
