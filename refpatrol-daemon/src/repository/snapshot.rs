//! Poll journal repository
//!
//! Handles all database operations for the git poll journal.

use std::collections::{BTreeMap, HashMap};

use refpatrol_core::domain::snapshot::RefSnapshot;
use sqlx::PgPool;
use uuid::Uuid;

/// Inserts one poll attempt. Single atomic statement: a crash between fetch
/// and write leaves no partial row, the next poll simply re-diffs against
/// the last successfully written snapshot.
pub async fn insert(pool: &PgPool, snapshot: &RefSnapshot) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO git_poll_journal (
            poll_id, polled_at, alias, url, refs, ref_filters, previous_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(snapshot.poll_id)
    .bind(snapshot.polled_at)
    .bind(&snapshot.alias)
    .bind(&snapshot.url)
    .bind(serde_json::to_value(&snapshot.refs).unwrap_or_default())
    .bind(&snapshot.ref_filters)
    .bind(snapshot.previous_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// The most recent snapshot for an alias, if any.
pub async fn latest_by_alias(
    pool: &PgPool,
    alias: &str,
) -> Result<Option<RefSnapshot>, sqlx::Error> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT poll_id, polled_at, alias, url, refs, ref_filters, previous_id
        FROM git_poll_journal
        WHERE alias = $1
        ORDER BY polled_at DESC, poll_id DESC
        LIMIT 1
        "#,
    )
    .bind(alias)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Latest recorded hash per ref name across the alias's entire snapshot
/// history. The basis is the latest snapshot in which each name appeared,
/// so names that vanished (or were filtered out) for a while still resolve
/// to their last recorded hash.
pub async fn recorded_refs(
    pool: &PgPool,
    alias: &str,
) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT DISTINCT ON (kv.key) kv.key, kv.value
        FROM git_poll_journal j
        CROSS JOIN LATERAL jsonb_each_text(j.refs) AS kv(key, value)
        WHERE j.alias = $1
        ORDER BY kv.key, j.polled_at DESC, j.poll_id DESC
        "#,
    )
    .bind(alias)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    poll_id: Uuid,
    polled_at: chrono::DateTime<chrono::Utc>,
    alias: String,
    url: String,
    refs: serde_json::Value,
    ref_filters: Vec<String>,
    previous_id: Option<Uuid>,
}

impl From<SnapshotRow> for RefSnapshot {
    fn from(row: SnapshotRow) -> Self {
        let refs: BTreeMap<String, String> =
            serde_json::from_value(row.refs).unwrap_or_default();

        RefSnapshot {
            poll_id: row.poll_id,
            polled_at: row.polled_at,
            alias: row.alias,
            url: row.url,
            refs,
            ref_filters: row.ref_filters,
            previous_id: row.previous_id,
        }
    }
}
