// SPDX-License-Identifier: Apache-2.0

//! [`JobInstanceHandle`], the narrow view of a running job instance this
//! crate needs in order to serve it over the control plane, without
//! depending on however the embedding process represents one.

use jobexec_engine::PhaseControl;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A single line of captured stdout/stderr output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub text: String,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// What the control plane needs from a running job instance: enough to
/// answer `get_instances`, serve `stop_instance`, tail output, and route
/// `exec_phase_control` to the right phase.
pub trait JobInstanceHandle: Send + Sync {
    fn instance_id(&self) -> &str;

    fn attributes(&self) -> &HashMap<String, String>;

    /// A serializable snapshot suitable for a `get_instances` result entry.
    fn snapshot(&self) -> serde_json::Value;

    fn stop(&self);

    /// The last `max_lines` captured output lines, oldest first.
    fn output_tail(&self, max_lines: usize) -> Vec<OutputLine>;

    /// Looks up a phase's control surface by id, if the instance has a
    /// phase with that id.
    fn phase_control(&self, phase_id: &str) -> Option<Arc<dyn PhaseControl>>;
}
