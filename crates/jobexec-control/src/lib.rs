// SPDX-License-Identifier: Apache-2.0

//! The JSON-RPC 2.0 control plane (§4.5): declares the four built-in
//! methods, validates and dispatches requests against a live set of job
//! instances, and serves them over a local Unix socket.

pub mod instance;
pub mod methods;
pub mod params;
pub mod server;
pub mod socket;
pub mod wire;

pub use instance::{JobInstanceHandle, OutputLine};
pub use methods::{default_methods, JsonRpcMethod, MethodKind, MethodTarget};
pub use params::{validate_params, ParamSpec, ParamType};
pub use server::ApiServer;
pub use socket::serve_unix_socket;
pub use wire::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
