// SPDX-License-Identifier: Apache-2.0

//! The built-in JSON-RPC methods (§4.5): `get_instances`, `stop_instance`,
//! `get_output_tail`, `exec_phase_control`.

use jobexec_engine::PhaseOpError;
use jobexec_types::JobRunCriteria;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::instance::JobInstanceHandle;
use crate::params::{ParamSpec, ParamType};
use crate::wire::{ErrorCode, JsonRpcError};

/// Whether a method operates over every instance matching a `run_match`
/// predicate, or a single named instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Collection,
    Instance,
}

/// The resolved target(s) a method executes against, after the server has
/// done the id/criteria lookup.
pub enum MethodTarget<'a> {
    Collection(Vec<Arc<dyn JobInstanceHandle>>),
    Instance(&'a Arc<dyn JobInstanceHandle>),
}

/// A single JSON-RPC method: its name, declared parameters, whether it
/// targets a collection or a single instance, and its execution.
pub trait JsonRpcMethod: Send + Sync {
    fn kind(&self) -> MethodKind;
    fn method_name(&self) -> &'static str;
    fn parameters(&self) -> &[ParamSpec];
    /// `args` excludes the leading `run_match`/`instance_id` selector
    /// parameter, which the server has already consumed to resolve `target`.
    fn execute(&self, target: MethodTarget<'_>, args: &[Value]) -> Result<Value, JsonRpcError>;
}

pub struct InstancesGetMethod {
    params: Vec<ParamSpec>,
}

impl Default for InstancesGetMethod {
    fn default() -> Self {
        Self {
            params: vec![ParamSpec::optional("run_match", ParamType::Object, json!({}))],
        }
    }
}

impl JsonRpcMethod for InstancesGetMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Collection
    }

    fn method_name(&self) -> &'static str {
        "get_instances"
    }

    fn parameters(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, target: MethodTarget<'_>, _args: &[Value]) -> Result<Value, JsonRpcError> {
        let MethodTarget::Collection(instances) = target else {
            unreachable!("get_instances is a COLLECTION method")
        };
        let job_run: Vec<Value> = instances.iter().map(|instance| instance.snapshot()).collect();
        Ok(json!({ "job_run": job_run }))
    }
}

pub struct InstancesStopMethod {
    params: Vec<ParamSpec>,
}

impl Default for InstancesStopMethod {
    fn default() -> Self {
        Self {
            params: vec![ParamSpec::required("instance_id", ParamType::String)],
        }
    }
}

impl JsonRpcMethod for InstancesStopMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Instance
    }

    fn method_name(&self) -> &'static str {
        "stop_instance"
    }

    fn parameters(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, target: MethodTarget<'_>, _args: &[Value]) -> Result<Value, JsonRpcError> {
        let MethodTarget::Instance(instance) = target else {
            unreachable!("stop_instance is an INSTANCE method")
        };
        instance.stop();
        Ok(json!({ "stop_result": "STOP_INITIATED" }))
    }
}

pub struct InstancesTailMethod {
    params: Vec<ParamSpec>,
}

impl Default for InstancesTailMethod {
    fn default() -> Self {
        Self {
            params: vec![
                ParamSpec::required("instance_id", ParamType::String),
                ParamSpec::optional("max_lines", ParamType::Integer, json!(100)),
            ],
        }
    }
}

impl JsonRpcMethod for InstancesTailMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Instance
    }

    fn method_name(&self) -> &'static str {
        "get_output_tail"
    }

    fn parameters(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, target: MethodTarget<'_>, args: &[Value]) -> Result<Value, JsonRpcError> {
        let MethodTarget::Instance(instance) = target else {
            unreachable!("get_output_tail is an INSTANCE method")
        };
        let max_lines = args.first().and_then(Value::as_u64).unwrap_or(100) as usize;
        let tail = instance.output_tail(max_lines);
        Ok(json!({ "tail": tail }))
    }
}

pub struct PhaseControlMethod {
    params: Vec<ParamSpec>,
}

impl Default for PhaseControlMethod {
    fn default() -> Self {
        Self {
            params: vec![
                ParamSpec::required("instance_id", ParamType::String),
                ParamSpec::required("phase_id", ParamType::String),
                ParamSpec::required("op_name", ParamType::String),
                ParamSpec::optional("op_args", ParamType::Array, json!([])),
            ],
        }
    }
}

impl JsonRpcMethod for PhaseControlMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Instance
    }

    fn method_name(&self) -> &'static str {
        "exec_phase_control"
    }

    fn parameters(&self) -> &[ParamSpec] {
        &self.params
    }

    fn execute(&self, target: MethodTarget<'_>, args: &[Value]) -> Result<Value, JsonRpcError> {
        let MethodTarget::Instance(instance) = target else {
            unreachable!("exec_phase_control is an INSTANCE method")
        };
        let phase_id = args.first().and_then(Value::as_str).unwrap_or_default();
        let op_name = args.get(1).and_then(Value::as_str).unwrap_or_default();
        let op_args = args.get(2).and_then(Value::as_array).cloned().unwrap_or_default();

        let control = instance
            .phase_control(phase_id)
            .ok_or_else(|| JsonRpcError::new(ErrorCode::PhaseNotFound, format!("no phase `{phase_id}` on this instance")))?;

        control.call(op_name, &op_args).map(|retval| json!({ "retval": python_str(&retval) })).map_err(|err| match err {
            PhaseOpError::NotFound(op) => JsonRpcError::new(ErrorCode::PhaseOpNotFound, format!("no such phase operation `{op}`")),
            PhaseOpError::InvalidArgs(reason) => JsonRpcError::new(ErrorCode::PhaseOpInvalidArgs, reason),
        })
    }
}

/// Approximates Python's `str()` rendering of a phase operation's JSON
/// result, e.g. `None` rather than `null`.
fn python_str(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// The four built-in methods, in the order the control plane advertises
/// them.
#[must_use]
pub fn default_methods() -> Vec<Box<dyn JsonRpcMethod>> {
    vec![
        Box::new(InstancesGetMethod::default()),
        Box::new(InstancesStopMethod::default()),
        Box::new(InstancesTailMethod::default()),
        Box::new(PhaseControlMethod::default()),
    ]
}

/// Parses a `run_match` parameter value (already defaulted to `{}` by
/// [`crate::params::validate_params`]) into a [`JobRunCriteria`].
pub fn parse_run_match(value: &Value) -> Result<JobRunCriteria, JsonRpcError> {
    serde_json::from_value(value.clone()).map_err(|err| JsonRpcError::new(ErrorCode::InvalidParams, format!("invalid run_match: {err}")))
}
