//! Ref snapshot differ
//!
//! Classifies a freshly fetched ref mapping against previously journaled
//! state. Each ref gets two independent verdicts:
//!
//! - an *observation* against the snapshot history (did this poll see
//!   something the poll journal has not recorded yet?), which drives
//!   snapshot baseline chaining and audit logging;
//! - a *dispatch* decision against the build journal's root entries (is
//!   there a build on record for exactly this name/hash?), which is the
//!   authority for at-most-once triggering. A trigger that failed leaves no
//!   root entry, so the ref stays dispatchable on the next cycle; a written
//!   root suppresses re-dispatch across restarts.

use std::collections::{BTreeMap, HashMap};

/// Durable state the differ compares against, re-derived from the journal
/// store every cycle. Never cached across cycles.
#[derive(Debug, Clone, Default)]
pub struct RecordedState {
    /// Latest recorded hash per ref name across the alias's snapshot
    /// history. The basis is the latest snapshot in which a name appeared,
    /// not merely the previous poll, so a temporarily filtered-out ref that
    /// reappears with an unchanged hash is still `Unchanged`.
    pub snapshot_refs: HashMap<String, String>,
    /// Latest root-entry hash per ref name from the build journal.
    pub dispatched_refs: HashMap<String, String>,
}

/// How a ref compares to the snapshot history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Name absent from all prior recorded state.
    New,
    /// Name recorded before with a different hash.
    Changed { previous: String },
    Unchanged,
}

/// Verdicts for a single ref in the current poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefClassification {
    pub name: String,
    pub hash: String,
    pub observation: Observation,
    /// True when no build root records this exact name/hash pair.
    pub needs_dispatch: bool,
}

/// Outcome of diffing one poll against recorded state.
#[derive(Debug, Clone, Default)]
pub struct PollDelta {
    /// One entry per current ref, ordered by name.
    pub classifications: Vec<RefClassification>,
    /// Names present in the snapshot history but absent from this poll.
    /// Removals never trigger builds; they only affect bookkeeping.
    pub removed: Vec<String>,
}

impl PollDelta {
    /// True when this poll observed at least one new or changed ref, making
    /// it a new comparison baseline.
    pub fn observed_change(&self) -> bool {
        self.classifications
            .iter()
            .any(|c| c.observation != Observation::Unchanged)
    }

    /// Refs that require a build trigger this cycle.
    pub fn dispatchable(&self) -> impl Iterator<Item = &RefClassification> {
        self.classifications.iter().filter(|c| c.needs_dispatch)
    }

    pub fn count_new(&self) -> usize {
        self.classifications
            .iter()
            .filter(|c| c.observation == Observation::New)
            .count()
    }

    pub fn count_changed(&self) -> usize {
        self.classifications
            .iter()
            .filter(|c| matches!(c.observation, Observation::Changed { .. }))
            .count()
    }
}

/// Classifies every ref of the current poll against recorded state.
pub fn classify(current: &BTreeMap<String, String>, recorded: &RecordedState) -> PollDelta {
    let classifications = current
        .iter()
        .map(|(name, hash)| {
            let observation = match recorded.snapshot_refs.get(name) {
                None => Observation::New,
                Some(prev) if prev != hash => Observation::Changed {
                    previous: prev.clone(),
                },
                Some(_) => Observation::Unchanged,
            };
            let needs_dispatch = recorded.dispatched_refs.get(name) != Some(hash);
            RefClassification {
                name: name.clone(),
                hash: hash.clone(),
                observation,
                needs_dispatch,
            }
        })
        .collect();

    let mut removed: Vec<String> = recorded
        .snapshot_refs
        .keys()
        .filter(|name| !current.contains_key(*name))
        .cloned()
        .collect();
    removed.sort();

    PollDelta {
        classifications,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> String {
        std::iter::repeat(c).take(40).collect()
    }

    fn current(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(n, h)| (n.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn test_first_poll_everything_new_and_dispatchable() {
        let refs = current(&[
            ("refs/heads/main", &hash('1')),
            ("refs/tags/v1", &hash('2')),
        ]);
        let delta = classify(&refs, &RecordedState::default());

        assert_eq!(delta.count_new(), 2);
        assert_eq!(delta.count_changed(), 0);
        assert_eq!(delta.dispatchable().count(), 2);
        assert!(delta.observed_change());
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_identical_poll_is_quiet() {
        let refs = current(&[("refs/heads/main", &hash('1'))]);
        let recorded = RecordedState {
            snapshot_refs: refs.clone().into_iter().collect(),
            dispatched_refs: refs.clone().into_iter().collect(),
        };
        let delta = classify(&refs, &recorded);

        assert!(!delta.observed_change());
        assert_eq!(delta.dispatchable().count(), 0);
    }

    #[test]
    fn test_changed_hash_reports_previous() {
        let refs = current(&[("refs/heads/main", &hash('3'))]);
        let recorded = RecordedState {
            snapshot_refs: HashMap::from([("refs/heads/main".to_string(), hash('1'))]),
            dispatched_refs: HashMap::from([("refs/heads/main".to_string(), hash('1'))]),
        };
        let delta = classify(&refs, &recorded);

        assert_eq!(delta.count_changed(), 1);
        assert_eq!(
            delta.classifications[0].observation,
            Observation::Changed {
                previous: hash('1')
            }
        );
        assert!(delta.classifications[0].needs_dispatch);
    }

    #[test]
    fn test_failed_trigger_stays_dispatchable() {
        // Snapshot recorded the hash but no build root exists for it: the
        // trigger failed last cycle and must be retried.
        let refs = current(&[("refs/heads/main", &hash('1'))]);
        let recorded = RecordedState {
            snapshot_refs: HashMap::from([("refs/heads/main".to_string(), hash('1'))]),
            dispatched_refs: HashMap::new(),
        };
        let delta = classify(&refs, &recorded);

        assert!(!delta.observed_change());
        assert_eq!(delta.dispatchable().count(), 1);
    }

    #[test]
    fn test_dispatched_ref_not_retriggered_without_snapshot() {
        // Build root written, then a crash before the snapshot landed: the
        // ref reads as New to the observation but must not dispatch again.
        let refs = current(&[("refs/heads/main", &hash('1'))]);
        let recorded = RecordedState {
            snapshot_refs: HashMap::new(),
            dispatched_refs: HashMap::from([("refs/heads/main".to_string(), hash('1'))]),
        };
        let delta = classify(&refs, &recorded);

        assert_eq!(delta.count_new(), 1);
        assert_eq!(delta.dispatchable().count(), 0);
    }

    #[test]
    fn test_removed_refs_listed_not_dispatched() {
        let refs = current(&[("refs/heads/main", &hash('1'))]);
        let recorded = RecordedState {
            snapshot_refs: HashMap::from([
                ("refs/heads/main".to_string(), hash('1')),
                ("refs/tags/gone".to_string(), hash('9')),
            ]),
            dispatched_refs: HashMap::from([
                ("refs/heads/main".to_string(), hash('1')),
                ("refs/tags/gone".to_string(), hash('9')),
            ]),
        };
        let delta = classify(&refs, &recorded);

        assert_eq!(delta.removed, vec!["refs/tags/gone".to_string()]);
        assert_eq!(delta.dispatchable().count(), 0);
        assert!(!delta.observed_change());
    }

    #[test]
    fn test_reappearing_ref_with_same_hash_is_unchanged() {
        // The comparison basis is the latest snapshot in which the name
        // appeared, so a ref that was filtered out for a while and came back
        // with the same hash is not New.
        let refs = current(&[("refs/tags/v1", &hash('2'))]);
        let recorded = RecordedState {
            snapshot_refs: HashMap::from([("refs/tags/v1".to_string(), hash('2'))]),
            dispatched_refs: HashMap::from([("refs/tags/v1".to_string(), hash('2'))]),
        };
        let delta = classify(&refs, &recorded);

        assert_eq!(delta.classifications[0].observation, Observation::Unchanged);
        assert_eq!(delta.dispatchable().count(), 0);
    }
}
