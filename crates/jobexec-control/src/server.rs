// SPDX-License-Identifier: Apache-2.0

//! [`ApiServer`]: holds the registry of currently-known job instances and
//! dispatches incoming JSON-RPC requests against the built-in methods.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::instance::JobInstanceHandle;
use crate::methods::{default_methods, parse_run_match, JsonRpcMethod, MethodKind, MethodTarget};
use crate::params::validate_params;
use crate::wire::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// The control-plane server: a method table plus the live set of job
/// instances it serves requests against.
pub struct ApiServer {
    methods: HashMap<&'static str, Box<dyn JsonRpcMethod>>,
    instances: Mutex<HashMap<String, Arc<dyn JobInstanceHandle>>>,
}

impl ApiServer {
    /// Builds a server with a custom method table.
    #[must_use]
    pub fn new(methods: Vec<Box<dyn JsonRpcMethod>>) -> Self {
        let methods = methods.into_iter().map(|m| (m.method_name(), m)).collect();
        Self {
            methods,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a server exposing the four built-in methods.
    #[must_use]
    pub fn with_default_methods() -> Self {
        Self::new(default_methods())
    }

    pub fn register_instance(&self, instance: Arc<dyn JobInstanceHandle>) {
        self.instances.lock().expect("instance registry poisoned").insert(instance.instance_id().to_string(), instance);
    }

    pub fn unregister_instance(&self, instance_id: &str) {
        self.instances.lock().expect("instance registry poisoned").remove(instance_id);
    }

    /// Parses, validates, and dispatches a single request body, returning
    /// the serialized response body. Never panics on malformed input; parse
    /// and protocol errors are reported as JSON-RPC error responses with
    /// `id: null`, per the spec's handling of unparseable requests.
    #[must_use]
    pub fn handle(&self, request_body: &str) -> String {
        let response = match serde_json::from_str::<JsonRpcRequest>(request_body) {
            Ok(request) => self.handle_request(request),
            Err(err) => JsonRpcResponse::failure(None, JsonRpcError::new(ErrorCode::ParseError, err.to_string())),
        };
        serde_json::to_string(&response).expect("JsonRpcResponse is always serializable")
    }

    fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        if request.jsonrpc.as_deref() != Some("2.0") {
            return JsonRpcResponse::failure(id, JsonRpcError::new(ErrorCode::InvalidRequest, "jsonrpc must be \"2.0\""));
        }

        if request.method == "ping" {
            return JsonRpcResponse::success(id, Value::String("pong".to_string()));
        }

        let Some(method) = self.methods.get(request.method.as_str()) else {
            return JsonRpcResponse::failure(id, JsonRpcError::new(ErrorCode::MethodNotFound, format!("unknown method `{}`", request.method)));
        };

        match validate_params(method.parameters(), request.params) {
            Ok(args) => match self.dispatch(method.as_ref(), &args) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => JsonRpcResponse::failure(id, err),
            },
            Err(err) => JsonRpcResponse::failure(id, err),
        }
    }

    fn dispatch(&self, method: &dyn JsonRpcMethod, args: &[Value]) -> Result<Value, JsonRpcError> {
        match method.kind() {
            MethodKind::Collection => {
                let criteria = parse_run_match(&args[0])?;
                let instances = self.instances.lock().expect("instance registry poisoned");
                let matching: Vec<Arc<dyn JobInstanceHandle>> = instances
                    .values()
                    .filter(|instance| criteria.matches(instance.instance_id(), instance.attributes()))
                    .cloned()
                    .collect();
                drop(instances);
                method.execute(MethodTarget::Collection(matching), &args[1..])
            }
            MethodKind::Instance => {
                let instance_id = args[0].as_str().unwrap_or_default();
                let instances = self.instances.lock().expect("instance registry poisoned");
                let Some(instance) = instances.get(instance_id) else {
                    return Err(JsonRpcError::new(ErrorCode::InstanceNotFound, format!("no instance `{instance_id}`")));
                };
                let result = method.execute(MethodTarget::Instance(instance), &args[1..]);
                drop(instances);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobexec_engine::{NoopControl, PhaseControl};
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    struct FakeInstance {
        id: String,
        attributes: StdHashMap<String, String>,
    }

    impl JobInstanceHandle for FakeInstance {
        fn instance_id(&self) -> &str {
            &self.id
        }

        fn attributes(&self) -> &StdHashMap<String, String> {
            &self.attributes
        }

        fn snapshot(&self) -> Value {
            json!({ "instance_id": self.id })
        }

        fn stop(&self) {}

        fn output_tail(&self, _max_lines: usize) -> Vec<crate::instance::OutputLine> {
            Vec::new()
        }

        fn phase_control(&self, phase_id: &str) -> Option<Arc<dyn PhaseControl>> {
            (phase_id == "known").then(|| Arc::new(NoopControl) as Arc<dyn PhaseControl>)
        }
    }

    fn server_with_instance(id: &str) -> ApiServer {
        let server = ApiServer::with_default_methods();
        server.register_instance(Arc::new(FakeInstance {
            id: id.to_string(),
            attributes: StdHashMap::new(),
        }));
        server
    }

    #[test]
    fn get_instances_returns_one_entry_per_match() {
        let server = server_with_instance("i1");
        let body = server.handle(r#"{"jsonrpc":"2.0","id":1,"method":"get_instances","params":{}}"#);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["result"]["job_run"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn stop_instance_on_unknown_id_reports_instance_not_found() {
        let server = ApiServer::with_default_methods();
        let body = server.handle(r#"{"jsonrpc":"2.0","id":1,"method":"stop_instance","params":{"instance_id":"missing"}}"#);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["error"]["code"], json!(ErrorCode::InstanceNotFound.code()));
    }

    #[test]
    fn unknown_method_is_reported() {
        let server = ApiServer::with_default_methods();
        let body = server.handle(r#"{"jsonrpc":"2.0","id":1,"method":"bogus","params":{}}"#);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["error"]["code"], json!(ErrorCode::MethodNotFound.code()));
    }

    #[test]
    fn exec_phase_control_on_unknown_phase_reports_phase_not_found() {
        let server = server_with_instance("i1");
        let body = server.handle(
            r#"{"jsonrpc":"2.0","id":1,"method":"exec_phase_control","params":{"instance_id":"i1","phase_id":"missing","op_name":"go"}}"#,
        );
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["error"]["code"], json!(ErrorCode::PhaseNotFound.code()));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let server = ApiServer::with_default_methods();
        let body = server.handle("not json");
        let response: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["error"]["code"], json!(ErrorCode::ParseError.code()));
    }

    #[test]
    fn ping_bypasses_method_lookup() {
        let server = ApiServer::with_default_methods();
        let body = server.handle(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert!(response.get("error").is_none());
        assert_eq!(response["id"], json!(9));
    }

    #[test]
    fn request_with_no_id_gets_a_response_with_no_id() {
        let server = ApiServer::with_default_methods();
        let body = server.handle(r#"{"jsonrpc":"2.0","method":"ping"}"#);
        let response: Value = serde_json::from_str(&body).unwrap();
        assert!(!response.as_object().unwrap().contains_key("id"));
    }
}
