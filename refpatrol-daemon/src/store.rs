//! Journal store abstraction
//!
//! All cross-cycle coordination goes through this trait: the poll service
//! and the status tracker re-derive their state from it every cycle and
//! keep nothing in memory between cycles. The production implementation
//! wraps the Postgres repositories; tests substitute the in-memory fake
//! from [`crate::fakes`].

use std::collections::HashMap;

use async_trait::async_trait;
use refpatrol_core::domain::build::{BuildJournalEntry, BuildStatus, ROOT_PARENT_ID};
use refpatrol_core::domain::snapshot::RefSnapshot;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{build_journal, snapshot};

/// Errors from journal reads and writes.
///
/// A write error never implies the write failed to land; callers must abort
/// the current unit's cycle and re-derive state next cycle rather than
/// assume anything about what was persisted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("journal store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A build journal entry about to be appended; `entry_id` is assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewBuildEntry {
    pub parent_id: i64,
    pub execution_id: Uuid,
    pub poll_id: Uuid,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub alias: String,
    pub ref_name: String,
    pub ref_hash: String,
    pub status: BuildStatus,
    pub terminal: bool,
}

impl NewBuildEntry {
    /// Root entry for a freshly triggered build.
    pub fn root(
        execution_id: Uuid,
        poll_id: Uuid,
        alias: impl Into<String>,
        ref_name: impl Into<String>,
        ref_hash: impl Into<String>,
        status: BuildStatus,
        terminal: bool,
    ) -> Self {
        Self {
            parent_id: ROOT_PARENT_ID,
            execution_id,
            poll_id,
            recorded_at: chrono::Utc::now(),
            alias: alias.into(),
            ref_name: ref_name.into(),
            ref_hash: ref_hash.into(),
            status,
            terminal,
        }
    }

    /// Transition entry chained off the execution's latest entry.
    pub fn transition(latest: &BuildJournalEntry, status: BuildStatus, terminal: bool) -> Self {
        Self {
            parent_id: latest.entry_id,
            execution_id: latest.execution_id,
            poll_id: latest.poll_id,
            recorded_at: chrono::Utc::now(),
            alias: latest.alias.clone(),
            ref_name: latest.ref_name.clone(),
            ref_hash: latest.ref_hash.clone(),
            status,
            terminal,
        }
    }

    pub fn with_entry_id(self, entry_id: i64) -> BuildJournalEntry {
        BuildJournalEntry {
            entry_id,
            parent_id: self.parent_id,
            execution_id: self.execution_id,
            poll_id: self.poll_id,
            recorded_at: self.recorded_at,
            alias: self.alias,
            ref_name: self.ref_name,
            ref_hash: self.ref_hash,
            status: self.status,
            terminal: self.terminal,
        }
    }
}

/// Durable, queryable storage for poll snapshots and build status chains.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Appends one poll snapshot (atomic, append-only).
    async fn insert_snapshot(&self, snapshot: &RefSnapshot) -> Result<(), StoreError>;

    /// Most recent snapshot for an alias.
    async fn latest_snapshot(&self, alias: &str) -> Result<Option<RefSnapshot>, StoreError>;

    /// Latest recorded hash per ref name across the alias's snapshot
    /// history.
    async fn recorded_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Latest root-entry hash per ref name from the build journal.
    async fn dispatched_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Appends a build journal entry, returning it with its assigned id.
    async fn insert_build_entry(
        &self,
        entry: &NewBuildEntry,
    ) -> Result<BuildJournalEntry, StoreError>;

    /// Latest entry of every execution whose chain is still non-terminal.
    async fn open_executions(&self) -> Result<Vec<BuildJournalEntry>, StoreError>;

    /// Full status chain for one execution, oldest first. Audit read path.
    async fn chain_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<BuildJournalEntry>, StoreError>;
}

/// Postgres-backed journal store.
pub struct PgJournal {
    pool: PgPool,
}

impl PgJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalStore for PgJournal {
    async fn insert_snapshot(&self, snap: &RefSnapshot) -> Result<(), StoreError> {
        snapshot::insert(&self.pool, snap).await.map_err(Into::into)
    }

    async fn latest_snapshot(&self, alias: &str) -> Result<Option<RefSnapshot>, StoreError> {
        snapshot::latest_by_alias(&self.pool, alias)
            .await
            .map_err(Into::into)
    }

    async fn recorded_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError> {
        snapshot::recorded_refs(&self.pool, alias)
            .await
            .map_err(Into::into)
    }

    async fn dispatched_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError> {
        build_journal::dispatched_refs(&self.pool, alias)
            .await
            .map_err(Into::into)
    }

    async fn insert_build_entry(
        &self,
        entry: &NewBuildEntry,
    ) -> Result<BuildJournalEntry, StoreError> {
        build_journal::insert(&self.pool, entry)
            .await
            .map_err(Into::into)
    }

    async fn open_executions(&self) -> Result<Vec<BuildJournalEntry>, StoreError> {
        build_journal::open_executions(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn chain_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<BuildJournalEntry>, StoreError> {
        build_journal::chain_for_execution(&self.pool, execution_id)
            .await
            .map_err(Into::into)
    }
}
