//! Poll snapshot domain types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One poll attempt against a remote repository.
///
/// Exactly one snapshot exists per poll attempt, successful or not
/// actionable; only the downstream build trigger is conditional. Snapshots
/// are append-only and never mutated.
///
/// `previous_id` implements baseline chaining: it is `None` when this poll
/// became a new comparison baseline (first poll for the alias, or a poll
/// that observed a new/changed ref), and points at the baseline snapshot
/// being reconfirmed otherwise. Audit tooling can therefore tell which poll
/// last changed the observed state and which polls were redundant
/// confirmations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefSnapshot {
    pub poll_id: Uuid,
    pub polled_at: chrono::DateTime<chrono::Utc>,
    pub alias: String,
    pub url: String,
    /// Ref name -> commit hash, pruned by `ref_filters`. Keys are unique.
    pub refs: BTreeMap<String, String>,
    /// Copy of the filters in effect when this poll ran.
    pub ref_filters: Vec<String>,
    pub previous_id: Option<Uuid>,
}

impl RefSnapshot {
    /// Builds a snapshot for the current poll attempt with a fresh id.
    pub fn record(
        alias: impl Into<String>,
        url: impl Into<String>,
        refs: BTreeMap<String, String>,
        ref_filters: Vec<String>,
        previous_id: Option<Uuid>,
    ) -> Self {
        Self {
            poll_id: Uuid::new_v4(),
            polled_at: chrono::Utc::now(),
            alias: alias.into(),
            url: url.into(),
            refs,
            ref_filters,
            previous_id,
        }
    }

    /// The baseline this snapshot belongs to: itself when it opened a new
    /// baseline, otherwise the baseline it reconfirmed.
    pub fn baseline_id(&self) -> Uuid {
        self.previous_id.unwrap_or(self.poll_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_id_of_fresh_baseline_is_self() {
        let snapshot = RefSnapshot::record("repo1", "url", BTreeMap::new(), Vec::new(), None);
        assert_eq!(snapshot.baseline_id(), snapshot.poll_id);
    }

    #[test]
    fn test_baseline_id_of_reconfirmation_points_back() {
        let baseline = Uuid::new_v4();
        let snapshot =
            RefSnapshot::record("repo1", "url", BTreeMap::new(), Vec::new(), Some(baseline));
        assert_eq!(snapshot.baseline_id(), baseline);
    }
}
