// SPDX-License-Identifier: Apache-2.0

//! Wires the phase execution engine, the coordination phases, and the
//! JSON-RPC control plane into a running job instance: event dispatch to
//! discovered listener sockets, the process-wide instance registry, and the
//! [`Runtime`] that spawns and retires instances.

pub mod config;
pub mod dispatch;
pub mod instance;
pub mod registry;
pub mod runtime;

pub use config::RuntimeConfig;
pub use dispatch::{EventInstanceMeta, ListenerDiscovery, OutputDispatcher, TransitionDispatcher, TransitionObserver};
pub use instance::{push_output_line, JobInstance, OutputLine, OutputSink};
pub use registry::InstanceRegistry;
pub use runtime::Runtime;
