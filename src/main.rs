// SPDX-License-Identifier: Apache-2.0

//! Demo harness: wires one job instance's phase tree (approval gate,
//! no-overlap check, execution queue admission, then simulated work)
//! through a [`Runtime`], serves it over a control-plane socket, and drives
//! it to completion.

use jobexec_controller::{JobInstance, OutputLine, OutputSink, Runtime, RuntimeConfig};
use jobexec_coordination::{ExecutionQueue, ExecutionQueueConfig, FlockNamedLock, NamedFileLock, NoOverlapConfig, NoOverlapPhase};
use jobexec_engine::{BasePhase, NoopControl, Phase, PhaseBehavior, PhaseControl, PhaseOutcome, RunContext, SequentialPhase};
use jobexec_types::{Fault, PhaseId, RunState, TerminationStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A leaf phase that simulates a unit of work: emits a couple of output
/// lines and completes. Stands in for whatever the embedding process's
/// actual job body is; this crate has no opinion on what that is.
struct DemoExecBehavior {
    output: Arc<OutputSink>,
}

impl PhaseBehavior for DemoExecBehavior {
    fn run_state(&self) -> RunState {
        RunState::Executing
    }

    fn control(&self) -> Arc<dyn PhaseControl> {
        Arc::new(NoopControl)
    }

    fn run(&self, _ctx: &RunContext) -> PhaseOutcome {
        for line in ["starting demo workload", "doing the work", "done"] {
            self.output.push(OutputLine {
                text: line.to_string(),
                is_error: false,
                source: Some("demo-exec".to_string()),
            });
            std::thread::sleep(Duration::from_millis(10));
        }
        PhaseOutcome::Completed
    }

    fn stop(&self) {}
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let lock_dir = std::env::temp_dir().join("jobexecd-locks");
    std::fs::create_dir_all(&lock_dir).expect("failed to create lock directory");
    let runtime_dir = std::env::temp_dir().join("jobexecd-runtime");
    std::fs::create_dir_all(&runtime_dir).expect("failed to create runtime directory");

    let runtime = Arc::new(Runtime::new(RuntimeConfig::new(runtime_dir)));
    let lock: Arc<dyn NamedFileLock> = Arc::new(FlockNamedLock::new(lock_dir));

    let control_socket = runtime.serve_control_socket();

    let approval = jobexec_coordination::ApprovalPhase::with_timeout(PhaseId::new("approval", "APPROVAL"), Some(Duration::from_secs(30)));
    let approval_control = approval.control();

    let no_overlap = NoOverlapPhase::new(
        PhaseId::new("no-overlap", "NO_OVERLAP"),
        NoOverlapConfig::new("nightly-etl"),
        runtime.registry.clone(),
        lock.clone(),
    );

    let (execution_queue, queue_handle) = ExecutionQueue::new(
        PhaseId::new("queue", "EXECUTION_QUEUE"),
        ExecutionQueueConfig::new("nightly-etl-workers", 2),
        runtime.registry.clone(),
        lock.clone(),
    );

    let mut attributes = HashMap::new();
    attributes.insert("owner".to_string(), "data-platform".to_string());

    let output_sink = Arc::new(OutputSink::new(runtime.output.clone(), "demo-run-1", attributes.clone()));
    let exec = BasePhase::new(PhaseId::new("exec", "EXEC"), Box::new(DemoExecBehavior { output: output_sink.clone() }));

    let children: Vec<Arc<dyn Phase>> = vec![Arc::new(approval), Arc::new(no_overlap), Arc::new(execution_queue), Arc::new(exec)];
    let root: Arc<dyn Phase> = Arc::new(SequentialPhase::new(PhaseId::new("root", "SEQUENTIAL"), children));

    let phaser = Arc::new(jobexec_engine::Phaser::new(vec![root.clone()]).expect("single root phase cannot collide on id"));

    let instance = Arc::new(JobInstance::with_output_buffer(
        "demo-run-1",
        attributes,
        root,
        phaser,
        Some(queue_handle),
        vec!["no_overlap:nightly-etl".to_string(), "execution_queue:nightly-etl-workers".to_string()],
        output_sink.buffer(),
    ));

    runtime.register(instance.clone());

    // Stand in for an external operator approving the gate over the control
    // plane; a real deployment's approval comes from `exec_phase_control`.
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        if let Err(err) = approval_control.call("approve", &[]) {
            tracing::warn!(error = %err, "demo auto-approval failed");
        }
    });

    let handle = runtime.spawn(instance.clone());
    let termination = handle.join().expect("instance thread panicked");

    match termination.status {
        TerminationStatus::Completed => tracing::info!("demo run completed"),
        status => tracing::warn!(?status, fault = ?termination.fault.as_ref().map(Fault::to_string), "demo run did not complete"),
    }

    runtime.shutdown_control_socket();
    match control_socket.join().expect("control socket thread panicked") {
        Ok(()) => {}
        Err(err) => tracing::warn!(error = %err, "control socket accept loop exited with an error"),
    }
}
