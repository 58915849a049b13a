// SPDX-License-Identifier: Apache-2.0

//! [`Runtime`]: wires the control-plane server, the instance registry, and
//! the event dispatchers together, and drives a [`JobInstance`]'s phaser on
//! its own thread from `start` to completion.

use jobexec_control::ApiServer;
use jobexec_engine::{PhaseDetail, PhaseObserver};
use jobexec_types::{PhaseUpdateEvent, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::dispatch::{OutputDispatcher, TransitionDispatcher, TransitionObserver};
use crate::instance::JobInstance;
use crate::registry::InstanceRegistry;

/// The control socket's file name under [`RuntimeConfig::runtime_dir`].
const CONTROL_SOCKET_NAME: &str = "control.sock";

/// The process-wide wiring: one [`ApiServer`], one [`InstanceRegistry`], and
/// the event dispatchers every spawned instance reports through.
pub struct Runtime {
    pub api: Arc<ApiServer>,
    pub registry: Arc<InstanceRegistry>,
    pub transitions: Arc<TransitionDispatcher>,
    pub output: Arc<OutputDispatcher>,
    config: RuntimeConfig,
    control_socket_stop: Arc<AtomicBool>,
}

impl Runtime {
    /// Builds a runtime whose event dispatchers discover listener sockets,
    /// and whose control socket binds, under `config.runtime_dir`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let listener_dir = config.runtime_dir.clone();
        Self {
            api: Arc::new(ApiServer::with_default_methods()),
            registry: Arc::new(InstanceRegistry::new()),
            transitions: Arc::new(TransitionDispatcher::new(listener_dir.clone())),
            output: Arc::new(OutputDispatcher::new(listener_dir)),
            config,
            control_socket_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serves the JSON-RPC control plane over a Unix socket at
    /// `config.runtime_dir`/`control.sock`, on its own thread, until
    /// [`Runtime::shutdown_control_socket`] is called.
    pub fn serve_control_socket(&self) -> std::thread::JoinHandle<std::io::Result<()>> {
        let socket_path = self.config.runtime_dir.join(CONTROL_SOCKET_NAME);
        let api = self.api.clone();
        let stop = self.control_socket_stop.clone();
        let file_mode = self.config.socket_file_mode;
        let poll_interval = self.config.accept_poll_interval;
        std::thread::spawn(move || jobexec_control::serve_unix_socket(&socket_path, file_mode, poll_interval, api, stop))
    }

    /// Signals the control socket's accept loop to stop after its next poll.
    pub fn shutdown_control_socket(&self) {
        self.control_socket_stop.store(true, Ordering::Relaxed);
    }

    /// Registers `instance` with the control plane and the coordination
    /// registry, and attaches the transition dispatcher to its root phase.
    /// Does not start it running; call [`Runtime::spawn`] for that.
    pub fn register(&self, instance: Arc<JobInstance>) {
        instance.root().add_phase_observer(
            Arc::new(TransitionObserver::new(self.transitions.clone(), InstanceMetaHandle(instance.clone()))),
            0,
            false,
        );
        if !instance.protection_tags().is_empty() {
            instance.root().add_phase_observer(
                Arc::new(ProtectionDepartureObserver {
                    registry: self.registry.clone(),
                    tags: instance.protection_tags().to_vec(),
                }),
                0,
                false,
            );
        }
        self.api.register_instance(instance.clone());
        self.registry.insert(instance);
    }

    /// Primes and runs `instance`'s phaser on a new thread, unregistering it
    /// from the control plane once the run finishes.
    pub fn spawn(&self, instance: Arc<JobInstance>) -> std::thread::JoinHandle<jobexec_types::TerminationInfo> {
        let api = self.api.clone();
        let registry = self.registry.clone();
        std::thread::spawn(move || {
            let phaser = instance.phaser().clone();
            phaser.prime();
            let term = phaser
                .run(&jobexec_engine::RunContext)
                .unwrap_or_else(|err| panic!("instance {} phaser misused: {err}", instance.instance_id()));
            api.unregister_instance(instance.instance_id());
            registry.remove(instance.instance_id());
            term
        })
    }

    /// Removes `instance_id` from the control plane and coordination
    /// registry without waiting for it to finish; used when an instance is
    /// abandoned before it was ever spawned.
    pub fn unregister(&self, instance_id: &str) {
        self.api.unregister_instance(instance_id);
        self.registry.remove(instance_id);
    }
}

/// Wakes every execution queue waiting on one of `tags` once any phase in
/// the tree ends, so a peer's departure from a no-overlap or execution-queue
/// protected phase re-triggers the dispatch election instead of only ever
/// waking on an explicit `signal_dispatch`.
struct ProtectionDepartureObserver {
    registry: Arc<InstanceRegistry>,
    tags: Vec<String>,
}

impl PhaseObserver for ProtectionDepartureObserver {
    fn on_phase_update(&self, event: &PhaseUpdateEvent<PhaseDetail>) {
        if event.stage != Stage::Ended {
            return;
        }
        for tag in &self.tags {
            self.registry.notify_protection_departure(tag);
        }
    }
}

struct InstanceMetaHandle(Arc<JobInstance>);

impl crate::dispatch::EventInstanceMeta for InstanceMetaHandle {
    fn instance_id(&self) -> &str {
        self.0.instance_id()
    }

    fn attributes(&self) -> &std::collections::HashMap<String, String> {
        self.0.attributes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobexec_engine::{BasePhase, NoopControl, Phase, PhaseBehavior, PhaseControl, PhaseOutcome, Phaser, RunContext};
    use jobexec_types::PhaseId;
    use std::sync::Arc as StdArc;

    struct Instant;
    impl PhaseBehavior for Instant {
        fn run_state(&self) -> jobexec_types::RunState {
            jobexec_types::RunState::Executing
        }
        fn control(&self) -> StdArc<dyn PhaseControl> {
            StdArc::new(NoopControl)
        }
        fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
            PhaseOutcome::Completed
        }
        fn stop(&self) {}
    }

    #[test]
    fn spawning_an_instance_runs_it_to_completion_and_unregisters_it() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(RuntimeConfig::new(dir.path()));
        let root: StdArc<dyn Phase> = StdArc::new(BasePhase::new(PhaseId::new("root", "TEST"), Box::new(Instant)));
        let phaser = StdArc::new(Phaser::new(vec![root.clone()]).unwrap());
        let instance = StdArc::new(JobInstance::new("i1", Default::default(), root, phaser, None, Vec::new()));
        runtime.register(instance.clone());
        assert!(runtime.registry.get("i1").is_some());
        let term = runtime.spawn(instance).join().unwrap();
        assert!(term.is_completed());
        assert!(runtime.registry.get("i1").is_none());
    }
}
