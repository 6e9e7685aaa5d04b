//! Database access for mediatext
//!
//! One SQLite database holding the jobs table. The store is the single
//! source of truth for job state; all concurrency control happens through
//! the atomicity of the statements in `jobs`.

pub mod jobs;

use sqlx::SqlitePool;
use std::path::Path;

use crate::error::Result;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the jobs table and its indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Instants that SQL compares or orders (created_at, next_eligible_at,
    // claimed_at, updated_at) are unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            media_kind TEXT NOT NULL,
            state TEXT NOT NULL,
            source_channel TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            payload BLOB,
            result_text TEXT,
            confidence REAL,
            error_reason TEXT,
            next_eligible_at INTEGER NOT NULL,
            claimed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup invariant: at most one job per content hash in a non-terminal
    // state. Makes check-and-insert atomic under concurrent submission.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_inflight_hash
        ON jobs (content_hash)
        WHERE state IN ('queued', 'processing')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_claim
        ON jobs (media_kind, state, next_eligible_at, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jobs)");

    Ok(())
}
