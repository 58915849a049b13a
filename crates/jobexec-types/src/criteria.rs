// SPDX-License-Identifier: Apache-2.0

//! [`JobRunCriteria`], the serialized predicate carried as the `run_match`
//! parameter of every `COLLECTION`-kind JSON-RPC method (§4.5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a single criterion value should be compared against the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Values must be equal.
    Exact,
    /// The candidate's value must contain the criterion's value as a substring.
    Contains,
}

impl Default for MatchStrategy {
    fn default() -> Self {
        Self::Exact
    }
}

/// A deserialized `run_match` predicate: a job instance matches if it
/// satisfies every populated field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRunCriteria {
    /// Instance ids to match (exact, OR'd together). Empty means "no
    /// constraint on instance id".
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Free-form attribute constraints, matched against a job instance's
    /// own attributes using `strategy`. All must match (AND).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Comparison strategy applied to `attributes`.
    #[serde(default)]
    pub strategy: MatchStrategy,
}

impl JobRunCriteria {
    /// A criteria value that matches every instance.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// A criteria value that matches only the given instance id.
    #[must_use]
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_ids: vec![instance_id.into()],
            ..Self::default()
        }
    }

    /// Evaluates this criteria against a candidate instance id and its
    /// attributes.
    #[must_use]
    pub fn matches(&self, instance_id: &str, attributes: &HashMap<String, String>) -> bool {
        if !self.instance_ids.is_empty() && !self.instance_ids.iter().any(|id| id == instance_id) {
            return false;
        }

        self.attributes.iter().all(|(key, want)| match attributes.get(key) {
            Some(have) => match self.strategy {
                MatchStrategy::Exact => have == want,
                MatchStrategy::Contains => have.contains(want.as_str()),
            },
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_instance() {
        let criteria = JobRunCriteria::any();
        assert!(criteria.matches("i1", &HashMap::new()));
    }

    #[test]
    fn instance_id_filters_by_exact_id() {
        let criteria = JobRunCriteria::for_instance("i1");
        assert!(criteria.matches("i1", &HashMap::new()));
        assert!(!criteria.matches("i2", &HashMap::new()));
    }

    #[test]
    fn attribute_matching_requires_all_constraints() {
        let mut attrs = HashMap::new();
        attrs.insert("env".to_string(), "prod".to_string());
        attrs.insert("team".to_string(), "payments".to_string());

        let mut want = HashMap::new();
        want.insert("env".to_string(), "prod".to_string());
        let criteria = JobRunCriteria {
            attributes: want,
            ..JobRunCriteria::any()
        };
        assert!(criteria.matches("i1", &attrs));

        let mut want_mismatch = HashMap::new();
        want_mismatch.insert("env".to_string(), "staging".to_string());
        let criteria = JobRunCriteria {
            attributes: want_mismatch,
            ..JobRunCriteria::any()
        };
        assert!(!criteria.matches("i1", &attrs));
    }

    #[test]
    fn round_trip_through_json_preserves_matches() {
        let criteria = JobRunCriteria::for_instance("i1");
        let json = serde_json::to_value(&criteria).unwrap();
        let restored: JobRunCriteria = serde_json::from_value(json).unwrap();
        assert_eq!(criteria, restored);
        assert!(restored.matches("i1", &HashMap::new()));
    }
}
