// SPDX-License-Identifier: Apache-2.0

//! The phase execution core: the [`Phase`] contract, the observer registry,
//! the [`BasePhase`] lifecycle wrapper, the composite phases built on it,
//! and the [`Phaser`] driver that runs a phase tree start to finish.

pub mod base;
pub mod composite;
pub mod error;
pub mod observer;
pub mod phase;
pub mod phaser;

pub use base::{BasePhase, PhaseBehavior, PhaseOutcome};
pub use composite::{DelegatingPhase, InitPhase, SequentialPhase, TerminalPhase, WaitWrapperPhase};
pub use error::{InvalidState, PhaseOpError};
pub use observer::{ObserverRegistry, PhaseObserver};
pub use phase::{NoopControl, Phase, PhaseControl, PhaseDetail, RunContext};
pub use phaser::{DuplicatePhaseId, Phaser, TransitionHook};
