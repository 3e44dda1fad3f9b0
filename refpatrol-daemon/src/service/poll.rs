//! Poll cycle service
//!
//! One cycle for one target: list remote refs, classify them against the
//! journaled state, persist the poll snapshot, then dispatch build triggers
//! for every ref the build journal has no record of.
//!
//! The snapshot is always written, actionable or not; only dispatch is
//! conditional. Dispatch dedup comes from the build journal rather than the
//! snapshot just written, so a trigger that fails (or a crash before its
//! root entry landed) is retried on the next cycle, while a recorded root
//! is never re-triggered, including across restarts.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use refpatrol_core::diff::{self, Observation, RecordedState};
use refpatrol_core::domain::snapshot::RefSnapshot;
use refpatrol_core::domain::target::RepoTarget;

use crate::backend::BuildBackend;
use crate::git::RefSource;
use crate::store::{JournalStore, NewBuildEntry};

/// Summary of one completed poll cycle, for logging and tests.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub poll_id: uuid::Uuid,
    pub refs_seen: usize,
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub triggered: usize,
    pub trigger_failures: usize,
}

/// Runs poll cycles against a ref source, a journal store and a build
/// backend.
pub struct PollService {
    store: Arc<dyn JournalStore>,
    source: Arc<dyn RefSource>,
    backend: Arc<dyn BuildBackend>,
}

impl PollService {
    pub fn new(
        store: Arc<dyn JournalStore>,
        source: Arc<dyn RefSource>,
        backend: Arc<dyn BuildBackend>,
    ) -> Self {
        Self {
            store,
            source,
            backend,
        }
    }

    /// Performs a single poll cycle for one target.
    ///
    /// Any error aborts this target's cycle only; the caller logs it and
    /// retries on the next tick. No partial journal entries are written on
    /// the fetch path: the snapshot insert is a single atomic statement and
    /// happens after classification.
    pub async fn poll_target(&self, target: &RepoTarget) -> Result<CycleReport> {
        let alias = target.alias.as_str();

        let current = self
            .source
            .list_refs(&target.url, &target.ref_filters)
            .await
            .context("Failed to list remote refs")?;
        debug!("{}: fetched {} ref(s)", alias, current.len());

        // Re-derive comparison state from the journal, never from memory.
        let recorded = RecordedState {
            snapshot_refs: self
                .store
                .recorded_refs(alias)
                .await
                .context("Failed to load recorded refs")?,
            dispatched_refs: self
                .store
                .dispatched_refs(alias)
                .await
                .context("Failed to load dispatched refs")?,
        };
        let delta = diff::classify(&current, &recorded);

        for classification in &delta.classifications {
            match &classification.observation {
                Observation::New => {
                    info!("{}: new ref {} at {}", alias, classification.name, classification.hash);
                }
                Observation::Changed { previous } => {
                    info!(
                        "{}: ref {} changed {} -> {}",
                        alias, classification.name, previous, classification.hash
                    );
                }
                Observation::Unchanged => {}
            }
        }
        for name in &delta.removed {
            debug!("{}: ref {} no longer present on remote", alias, name);
        }

        // Baseline chaining: a poll that observed nothing new reconfirms
        // the baseline already in effect; otherwise it becomes one itself.
        let previous_id = if delta.observed_change() {
            None
        } else {
            self.store
                .latest_snapshot(alias)
                .await
                .context("Failed to load latest snapshot")?
                .map(|latest| latest.baseline_id())
        };

        let snapshot = RefSnapshot::record(
            alias,
            &target.url,
            current,
            target.ref_filters.clone(),
            previous_id,
        );
        self.store
            .insert_snapshot(&snapshot)
            .await
            .context("Failed to persist poll snapshot")?;

        let (triggered, trigger_failures) = self.dispatch(&snapshot, &delta).await?;

        let report = CycleReport {
            poll_id: snapshot.poll_id,
            refs_seen: snapshot.refs.len(),
            new: delta.count_new(),
            changed: delta.count_changed(),
            removed: delta.removed.len(),
            triggered,
            trigger_failures,
        };

        if report.new == 0 && report.changed == 0 {
            debug!("{}: nothing actionable ({} refs)", alias, report.refs_seen);
        }
        Ok(report)
    }

    /// Issues one trigger per dispatchable ref, recording the root journal
    /// entry in the same step as the decision. A failed trigger writes
    /// nothing, leaving the ref dispatchable on the next cycle.
    async fn dispatch(
        &self,
        snapshot: &RefSnapshot,
        delta: &diff::PollDelta,
    ) -> Result<(usize, usize)> {
        let alias = snapshot.alias.as_str();
        let mut triggered = 0;
        let mut failures = 0;

        for change in delta.dispatchable() {
            let build = match self
                .backend
                .trigger(alias, &change.name, &change.hash)
                .await
            {
                Ok(build) => build,
                Err(e) => {
                    warn!(
                        "{}: trigger failed for {} at {}: {}",
                        alias, change.name, change.hash, e
                    );
                    failures += 1;
                    continue;
                }
            };

            let terminal = self.backend.terminal_outcome(&build.status).is_some();
            let root = NewBuildEntry::root(
                build.execution_id,
                snapshot.poll_id,
                alias,
                &change.name,
                &change.hash,
                build.status,
                terminal,
            );
            let entry = self
                .store
                .insert_build_entry(&root)
                .await
                .context("Failed to record build journal root")?;

            info!(
                "{}: triggered build {} for {} at {} (entry {})",
                alias, entry.execution_id, change.name, change.hash, entry.entry_id
            );
            triggered += 1;
        }

        Ok((triggered, failures))
    }
}
