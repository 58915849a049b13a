// SPDX-License-Identifier: Apache-2.0

//! Coordination gate phases built on [`jobexec_engine`]'s [`Phase`] contract:
//! [`ApprovalPhase`] (manual gate with timeout), [`DependencyPhase`] (active
//! fleet predicate), [`NoOverlapPhase`] (named mutual exclusion),
//! [`WaitingPhase`] (blocks on observable conditions), and
//! [`ExecutionQueue`] (FIFO admission bounded by a concurrency limit).
//!
//! Each phase is built against narrow adapter traits — [`ActiveRunRegistry`],
//! [`NamedFileLock`], [`ObservableCondition`] — standing in for the
//! cross-process registry and low-level file-lock/pub-sub collaborators a
//! full deployment would wire in from outside this crate.

pub mod approval;
pub mod condition;
pub mod config;
pub mod dependency;
pub mod error;
pub mod execution_queue;
pub mod lock;
pub mod no_overlap;
pub mod registry;
pub mod waiting;

pub use approval::ApprovalPhase;
pub use condition::{ConditionListener, ConditionResult, ObservableCondition};
pub use config::{ExecutionQueueConfig, NoOverlapConfig};
pub use dependency::DependencyPhase;
pub use error::CoordinationError;
pub use execution_queue::{ExecutionQueue, ExecutionQueueHandle};
pub use lock::{FlockNamedLock, LockGuard, NamedFileLock};
pub use no_overlap::NoOverlapPhase;
pub use registry::{ActiveRun, ActiveRunRegistry, ProtectionWatch};
pub use waiting::WaitingPhase;
