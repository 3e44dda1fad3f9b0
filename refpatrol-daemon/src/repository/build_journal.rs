//! Build journal repository
//!
//! Handles all database operations for the build status journal. Entries
//! are append-only; `entry_id` is assigned by the database and returned to
//! the caller so transition entries can chain off it.

use std::collections::HashMap;

use refpatrol_core::domain::build::{BuildJournalEntry, BuildStatus, ROOT_PARENT_ID};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::NewBuildEntry;

/// Appends one journal entry and returns it with the assigned entry id.
pub async fn insert(
    pool: &PgPool,
    entry: &NewBuildEntry,
) -> Result<BuildJournalEntry, sqlx::Error> {
    let entry_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO build_journal (
            parent_id, execution_id, poll_id, recorded_at, alias,
            ref_name, ref_hash, status, terminal
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING entry_id
        "#,
    )
    .bind(entry.parent_id)
    .bind(entry.execution_id)
    .bind(entry.poll_id)
    .bind(entry.recorded_at)
    .bind(&entry.alias)
    .bind(&entry.ref_name)
    .bind(&entry.ref_hash)
    .bind(entry.status.as_value())
    .bind(entry.terminal)
    .fetch_one(pool)
    .await?;

    Ok(entry.clone().with_entry_id(entry_id))
}

/// Latest root-entry hash per ref name for an alias. This is the dispatch
/// dedup set: a current hash present here has already been handed to the
/// build backend.
pub async fn dispatched_refs(
    pool: &PgPool,
    alias: &str,
) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT DISTINCT ON (ref_name) ref_name, ref_hash
        FROM build_journal
        WHERE alias = $1 AND parent_id = $2
        ORDER BY ref_name, entry_id DESC
        "#,
    )
    .bind(alias)
    .bind(ROOT_PARENT_ID)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Latest journal entry of every execution whose chain has not reached a
/// terminal status, across all aliases.
pub async fn open_executions(pool: &PgPool) -> Result<Vec<BuildJournalEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EntryRow>(
        r#"
        SELECT entry_id, parent_id, execution_id, poll_id, recorded_at,
               alias, ref_name, ref_hash, status, terminal
        FROM (
            SELECT DISTINCT ON (execution_id)
                   entry_id, parent_id, execution_id, poll_id, recorded_at,
                   alias, ref_name, ref_hash, status, terminal
            FROM build_journal
            ORDER BY execution_id, entry_id DESC
        ) latest
        WHERE NOT latest.terminal
        ORDER BY latest.entry_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Full chain for one execution, oldest first. Audit/debug helper.
pub async fn chain_for_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<BuildJournalEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EntryRow>(
        r#"
        SELECT entry_id, parent_id, execution_id, poll_id, recorded_at,
               alias, ref_name, ref_hash, status, terminal
        FROM build_journal
        WHERE execution_id = $1
        ORDER BY entry_id ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntryRow {
    entry_id: i64,
    parent_id: i64,
    execution_id: Uuid,
    poll_id: Uuid,
    recorded_at: chrono::DateTime<chrono::Utc>,
    alias: String,
    ref_name: String,
    ref_hash: String,
    status: serde_json::Value,
    terminal: bool,
}

impl From<EntryRow> for BuildJournalEntry {
    fn from(row: EntryRow) -> Self {
        BuildJournalEntry {
            entry_id: row.entry_id,
            parent_id: row.parent_id,
            execution_id: row.execution_id,
            poll_id: row.poll_id,
            recorded_at: row.recorded_at,
            alias: row.alias,
            ref_name: row.ref_name,
            ref_hash: row.ref_hash,
            status: BuildStatus::new(row.status),
            terminal: row.terminal,
        }
    }
}
