// SPDX-License-Identifier: Apache-2.0

//! The JSON-RPC 2.0 envelope and error vocabulary (§4.5).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes returned in a JSON-RPC error response. The standard range
/// mirrors the JSON-RPC 2.0 spec; `1xx`/`2xx` are specific to this control
/// plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    PhaseOpNotFound = 1,
    PhaseOpInvalidArgs = 2,
    MethodExecutionError = 100,
    InstanceNotFound = 200,
    PhaseNotFound = 201,
}

impl ErrorCode {
    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }
}

/// A JSON-RPC error, carried either as a server-side `Result::Err` or
/// serialized directly into a response body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (code {})", code.code())]
pub struct JsonRpcError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// An inbound request, loosely validated: `jsonrpc` must be `"2.0"` and
/// `method` must be present; `id` and `params` are otherwise permissive,
/// matching the shape real clients send.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outbound response: exactly one of `result`/`error` is present, per the
/// JSON-RPC 2.0 spec. `id` is omitted entirely, rather than sent as `null`,
/// when the request carried none.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcErrorBody {
                code: error.code.code(),
                message: error.message,
                data: error.data,
            }),
        }
    }
}
