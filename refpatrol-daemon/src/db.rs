//! Database pool and migrations

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_WAIT: Duration = Duration::from_secs(10);

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Connects to the database, retrying transient failures a few times.
///
/// The journal database frequently starts alongside the daemon (compose,
/// unit ordering), so the first connection attempts may race its startup.
/// Authentication and unknown-database errors are not retried.
pub async fn connect_with_retry(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let mut last_err = None;

    for attempt in 1..=CONNECT_ATTEMPTS {
        match create_pool(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e @ sqlx::Error::Database(_)) => {
                // Bad credentials or a missing database won't fix themselves.
                tracing::error!("Database rejected connection: {}", e);
                return Err(e);
            }
            Err(e) => {
                if attempt < CONNECT_ATTEMPTS {
                    tracing::warn!(
                        "Connect attempt {}/{} failed: {}. Retry in {:?}...",
                        attempt,
                        CONNECT_ATTEMPTS,
                        e,
                        CONNECT_WAIT
                    );
                    tokio::time::sleep(CONNECT_WAIT).await;
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or(sqlx::Error::PoolClosed))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Poll journal: one immutable row per poll attempt.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS git_poll_journal (
            poll_id UUID PRIMARY KEY,
            polled_at TIMESTAMPTZ NOT NULL,
            alias VARCHAR(255) NOT NULL,
            url TEXT NOT NULL,
            refs JSONB NOT NULL DEFAULT '{}',
            ref_filters TEXT[] NOT NULL DEFAULT '{}',
            previous_id UUID
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Build journal: append-only status chains keyed by execution_id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_journal (
            entry_id BIGSERIAL PRIMARY KEY,
            parent_id BIGINT NOT NULL DEFAULT 0,
            execution_id UUID NOT NULL,
            poll_id UUID NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL,
            alias VARCHAR(255) NOT NULL,
            ref_name TEXT NOT NULL,
            ref_hash VARCHAR(64) NOT NULL,
            status JSONB NOT NULL,
            terminal BOOLEAN NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_poll_journal_alias_time \
         ON git_poll_journal(alias, polled_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_journal_roots \
         ON build_journal(alias, ref_name, entry_id DESC) WHERE parent_id = 0",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_journal_execution \
         ON build_journal(execution_id, entry_id DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
