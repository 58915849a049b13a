// SPDX-License-Identifier: Apache-2.0

//! The Phaser's transition log: [`PhaseRun`] entries accumulate into a
//! [`Lifecycle`], and every `BasePhase::run` emits a [`PhaseUpdateEvent`]
//! at entry and exit.

use crate::phase::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a [`Lifecycle`]: the phase that was entered, its run
/// state, and when the Phaser advanced to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRun {
    /// Id of the phase entered.
    pub phase_id: String,
    /// The phase's run state at the moment of entry.
    pub run_state: RunState,
    /// When the Phaser advanced to this phase.
    pub entered_at: DateTime<Utc>,
}

impl PhaseRun {
    /// Builds a new phase-run entry.
    pub fn new(phase_id: impl Into<String>, run_state: RunState, entered_at: DateTime<Utc>) -> Self {
        Self {
            phase_id: phase_id.into(),
            run_state,
            entered_at,
        }
    }
}

/// An ordered log of [`PhaseRun`]s, append-only for the lifetime of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lifecycle {
    runs: Vec<PhaseRun>,
}

impl Lifecycle {
    /// Builds an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new phase-run entry.
    pub fn add_phase_run(&mut self, run: PhaseRun) {
        self.runs.push(run);
    }

    /// All recorded phase runs, in transition order.
    #[must_use]
    pub fn phase_runs(&self) -> &[PhaseRun] {
        &self.runs
    }

    /// The number of phases entered so far.
    #[must_use]
    pub fn phase_count(&self) -> usize {
        self.runs.len()
    }

    /// The previous phase run, if any (the run before `current_run`).
    #[must_use]
    pub fn previous_run(&self) -> Option<&PhaseRun> {
        self.runs.len().checked_sub(2).map(|i| &self.runs[i])
    }

    /// The most recently entered phase run, if any.
    #[must_use]
    pub fn current_run(&self) -> Option<&PhaseRun> {
        self.runs.last()
    }

    /// Whether any recorded run matches the given phase id or run state
    /// selector (used by `wait_for_transition`).
    #[must_use]
    pub fn any_matches(&self, phase_id: Option<&str>, run_state: Option<RunState>) -> bool {
        self.runs.iter().any(|run| {
            phase_id.is_some_and(|id| run.phase_id == id)
                || run_state.is_some_and(|state| run.run_state == state)
        })
    }
}

/// Which edge of a phase's lifecycle a [`PhaseUpdateEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// The phase has just started running.
    Running,
    /// The phase has just terminated.
    Ended,
}

/// Notification emitted by a phase at the `RUNNING` and `ENDED` edges of
/// its lifecycle, carrying a serializable snapshot of its detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseUpdateEvent<D> {
    /// Snapshot of the phase's detail at the time of the event.
    pub detail: D,
    /// Which edge of the lifecycle this event reports.
    pub stage: Stage,
    /// When the event occurred.
    pub at: DateTime<Utc>,
}

impl<D> PhaseUpdateEvent<D> {
    /// Builds a new phase update event.
    pub fn new(detail: D, stage: Stage, at: DateTime<Utc>) -> Self {
        Self { detail, stage, at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_and_current_run_track_the_tail() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.current_run().is_none());
        assert!(lifecycle.previous_run().is_none());

        let t = Utc::now();
        lifecycle.add_phase_run(PhaseRun::new("init", RunState::Created, t));
        assert_eq!(lifecycle.current_run().unwrap().phase_id, "init");
        assert!(lifecycle.previous_run().is_none());

        lifecycle.add_phase_run(PhaseRun::new("a", RunState::Executing, t));
        assert_eq!(lifecycle.current_run().unwrap().phase_id, "a");
        assert_eq!(lifecycle.previous_run().unwrap().phase_id, "init");
        assert_eq!(lifecycle.phase_count(), 2);
    }

    #[test]
    fn any_matches_checks_both_selectors() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.add_phase_run(PhaseRun::new("a", RunState::Executing, Utc::now()));
        assert!(lifecycle.any_matches(Some("a"), None));
        assert!(lifecycle.any_matches(None, Some(RunState::Executing)));
        assert!(!lifecycle.any_matches(Some("b"), Some(RunState::Pending)));
    }
}
