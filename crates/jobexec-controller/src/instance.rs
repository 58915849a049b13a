// SPDX-License-Identifier: Apache-2.0

//! [`JobInstance`]: one running phase tree, its captured output, and the
//! bits of identity the control plane and coordination phases need.

use jobexec_coordination::ExecutionQueueHandle;
use jobexec_control::JobInstanceHandle;
use jobexec_engine::{Phase, PhaseControl, Phaser};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::dispatch::{EventInstanceMeta, OutputDispatcher};

pub use jobexec_control::OutputLine;

/// How many output lines a single instance keeps in memory for
/// `get_output_tail`; older lines are dropped once exceeded.
const OUTPUT_BUFFER_CAPACITY: usize = 4096;

/// A running job: its phase tree and driving [`Phaser`], plus the identity
/// and output history the control plane exposes.
pub struct JobInstance {
    instance_id: String,
    attributes: HashMap<String, String>,
    created_at: chrono::DateTime<chrono::Utc>,
    root: Arc<dyn Phase>,
    phaser: Arc<Phaser>,
    execution_queue: Option<ExecutionQueueHandle>,
    protection_tags: Vec<String>,
    output: Arc<Mutex<VecDeque<OutputLine>>>,
}

impl JobInstance {
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        attributes: HashMap<String, String>,
        root: Arc<dyn Phase>,
        phaser: Arc<Phaser>,
        execution_queue: Option<ExecutionQueueHandle>,
        protection_tags: Vec<String>,
    ) -> Self {
        Self::with_output_buffer(instance_id, attributes, root, phaser, execution_queue, protection_tags, Arc::new(Mutex::new(VecDeque::new())))
    }

    /// Builds an instance sharing its output buffer with an external
    /// producer, e.g. a phase behavior that appends captured output lines
    /// as it runs.
    #[must_use]
    pub fn with_output_buffer(
        instance_id: impl Into<String>,
        attributes: HashMap<String, String>,
        root: Arc<dyn Phase>,
        phaser: Arc<Phaser>,
        execution_queue: Option<ExecutionQueueHandle>,
        protection_tags: Vec<String>,
        output: Arc<Mutex<VecDeque<OutputLine>>>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            attributes,
            created_at: chrono::Utc::now(),
            root,
            phaser,
            execution_queue,
            protection_tags,
            output,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Arc<dyn Phase> {
        &self.root
    }

    #[must_use]
    pub fn phaser(&self) -> &Arc<Phaser> {
        &self.phaser
    }

    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    #[must_use]
    pub fn protection_tags(&self) -> &[String] {
        &self.protection_tags
    }

    #[must_use]
    pub fn execution_queue(&self) -> Option<&ExecutionQueueHandle> {
        self.execution_queue.as_ref()
    }

    /// Whether this instance is currently sitting in an execution queue,
    /// per its root phase tree's current run state.
    #[must_use]
    pub fn in_queue(&self) -> bool {
        self.root.run_state() == jobexec_types::RunState::InQueue
    }

    /// Whether this instance currently holds the `EXECUTING` run state.
    #[must_use]
    pub fn executing(&self) -> bool {
        self.root.run_state() == jobexec_types::RunState::Executing
    }

    /// Appends a captured output line, evicting the oldest line if the
    /// buffer is at capacity.
    pub fn record_output(&self, line: OutputLine) {
        push_output_line(&self.output, line);
    }

    /// The shared output buffer, for a phase behavior that wants to append
    /// to it directly as it produces output.
    #[must_use]
    pub fn output_buffer(&self) -> Arc<Mutex<VecDeque<OutputLine>>> {
        self.output.clone()
    }
}

/// Appends `line` to `buffer`, evicting the oldest line once
/// [`OUTPUT_BUFFER_CAPACITY`] is reached.
pub fn push_output_line(buffer: &Mutex<VecDeque<OutputLine>>, line: OutputLine) {
    let mut buffer = buffer.lock().expect("output buffer poisoned");
    if buffer.len() == OUTPUT_BUFFER_CAPACITY {
        buffer.pop_front();
    }
    buffer.push_back(line);
}

struct SinkIdentity {
    instance_id: String,
    attributes: HashMap<String, String>,
}

impl EventInstanceMeta for SinkIdentity {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }
}

/// What a phase behavior that produces output actually holds: a buffer
/// shared with the owning [`JobInstance`] (so `get_output_tail` sees the
/// same lines) and the dispatcher that fans each line out to `.olistener`
/// sockets the moment it's captured.
pub struct OutputSink {
    buffer: Arc<Mutex<VecDeque<OutputLine>>>,
    dispatcher: Arc<OutputDispatcher>,
    identity: SinkIdentity,
}

impl OutputSink {
    #[must_use]
    pub fn new(dispatcher: Arc<OutputDispatcher>, instance_id: impl Into<String>, attributes: HashMap<String, String>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            dispatcher,
            identity: SinkIdentity {
                instance_id: instance_id.into(),
                attributes,
            },
        }
    }

    /// Shared with [`JobInstance::with_output_buffer`] so the instance's
    /// `get_output_tail` reads lines pushed here.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<VecDeque<OutputLine>>> {
        self.buffer.clone()
    }

    /// Buffers `line` for later retrieval and dispatches it to every
    /// currently discoverable `.olistener` socket.
    pub fn push(&self, line: OutputLine) {
        push_output_line(&self.buffer, line.clone());
        self.dispatcher.dispatch(&self.identity, &line);
    }
}

impl EventInstanceMeta for JobInstance {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }
}

impl JobInstanceHandle for JobInstance {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "instance_id": self.instance_id,
            "attributes": self.attributes,
            "created_at": self.created_at,
            "lifecycle": self.phaser.lifecycle(),
            "termination": self.phaser.termination_info(),
            "phases": self.root.detail(),
        })
    }

    fn stop(&self) {
        self.phaser.stop();
    }

    fn output_tail(&self, max_lines: usize) -> Vec<OutputLine> {
        let buffer = self.output.lock().expect("output buffer poisoned");
        buffer.iter().rev().take(max_lines).rev().cloned().collect()
    }

    fn phase_control(&self, phase_id: &str) -> Option<Arc<dyn PhaseControl>> {
        self.root.find_phase_control(phase_id, None).ok().flatten()
    }
}
