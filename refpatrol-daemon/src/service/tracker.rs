//! Build status tracker
//!
//! Each open build execution is an explicit state machine keyed by its root
//! journal entry: on every pass the tracker re-queries the backend and
//! appends a transition entry only when the payload actually differs from
//! the latest recorded one. Once a terminal entry lands, the execution
//! drops out of the open set and is never polled again.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::backend::BuildBackend;
use crate::store::{JournalStore, NewBuildEntry};

/// Summary of one completed tracking pass.
#[derive(Debug, Clone)]
pub struct TrackReport {
    pub open: usize,
    pub transitions: usize,
    pub completed: usize,
    pub query_failures: usize,
}

/// Tracks outstanding build executions to completion.
pub struct StatusTracker {
    store: Arc<dyn JournalStore>,
    backend: Arc<dyn BuildBackend>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn JournalStore>, backend: Arc<dyn BuildBackend>) -> Self {
        Self { store, backend }
    }

    /// Re-queries every open execution once. A failing status query only
    /// skips that execution for this pass; the others proceed.
    pub async fn run_pass(&self) -> Result<TrackReport> {
        let open = self
            .store
            .open_executions()
            .await
            .context("Failed to list open build executions")?;

        let mut report = TrackReport {
            open: open.len(),
            transitions: 0,
            completed: 0,
            query_failures: 0,
        };
        if open.is_empty() {
            debug!("No open build executions");
            return Ok(report);
        }
        debug!("Tracking {} open build execution(s)", open.len());

        for latest in open {
            let status = match self.backend.describe(latest.execution_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "{}: status query failed for build {}: {}",
                        latest.alias, latest.execution_id, e
                    );
                    report.query_failures += 1;
                    continue;
                }
            };

            if status == latest.status {
                // Polling noise; the chain records transitions only.
                continue;
            }

            let outcome = self.backend.terminal_outcome(&status);
            let entry = NewBuildEntry::transition(&latest, status, outcome.is_some());
            let entry = self
                .store
                .insert_build_entry(&entry)
                .await
                .context("Failed to record build status transition")?;
            report.transitions += 1;

            match outcome {
                Some(outcome) => {
                    info!(
                        "{}: build {} for {} finished: {} (entry {})",
                        entry.alias, entry.execution_id, entry.ref_name, outcome, entry.entry_id
                    );
                    report.completed += 1;
                }
                None => {
                    info!(
                        "{}: build {} for {} transitioned (entry {})",
                        entry.alias, entry.execution_id, entry.ref_name, entry.entry_id
                    );
                }
            }
        }

        Ok(report)
    }
}
