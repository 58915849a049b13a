// SPDX-License-Identifier: Apache-2.0

//! [`ObservableCondition`]: a condition a [`crate::WaitingPhase`] can block
//! on, evaluated asynchronously and reported back through a listener.

use std::sync::Arc;

/// The outcome of evaluating an [`ObservableCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionResult {
    /// Not yet evaluated.
    None,
    /// The condition holds.
    Satisfied,
    /// The condition does not hold.
    Unsatisfied,
    /// Evaluation itself failed.
    EvaluationError,
}

impl ConditionResult {
    /// Whether this result represents a successful evaluation.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// Whether this result represents any evaluation at all (not `None`).
    #[must_use]
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Notified when an [`ObservableCondition`]'s result changes.
pub trait ConditionListener: Send + Sync {
    /// Called after the condition's `result()` may have changed.
    fn on_result(&self);
}

/// A condition that can be evaluated in the background and polled for its
/// current result, used to gate a [`crate::WaitingPhase`].
pub trait ObservableCondition: Send + Sync {
    /// Begins evaluating this condition, reporting changes to `listener`.
    fn start_evaluation(&self, listener: Arc<dyn ConditionListener>);

    /// The condition's current result.
    fn result(&self) -> ConditionResult;

    /// Stops evaluating this condition (e.g. because the waiting phase it
    /// gates has ended).
    fn stop(&self);
}
