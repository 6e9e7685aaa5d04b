//! Job store operations
//!
//! The store exclusively owns job records. Workers hold only a
//! dispatch-scoped lease (the `processing` state plus `claimed_at`) and must
//! write back through `commit_result`/`commit_failure` before releasing it.
//!
//! Concurrency safety comes from statement atomicity, not table locks:
//! `submit_or_reuse` is a conditional insert guarded by a partial unique
//! index, and `claim_next_queued` is a single conditional UPDATE.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ErrorReason, Job, JobState, MediaKind, SourceChannel};

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub job_id: Uuid,
    /// True when an identical submission was already in flight and its id
    /// was returned instead of creating a new row
    pub deduplicated: bool,
}

/// A claimed job together with its payload bytes
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    pub payload: Vec<u8>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("corrupt job id {id_str}: {e}")))?;

    let kind_str: String = row.get("media_kind");
    let media_kind = MediaKind::parse(&kind_str)
        .ok_or_else(|| Error::Internal(format!("unknown media kind: {kind_str}")))?;

    let state_str: String = row.get("state");
    let state = JobState::parse(&state_str)
        .ok_or_else(|| Error::Internal(format!("unknown job state: {state_str}")))?;

    let channel_str: String = row.get("source_channel");
    let source_channel = SourceChannel::parse(&channel_str)
        .ok_or_else(|| Error::Internal(format!("unknown source channel: {channel_str}")))?;

    let error_reason = row
        .get::<Option<String>, _>("error_reason")
        .map(|s| {
            ErrorReason::parse(&s)
                .ok_or_else(|| Error::Internal(format!("unknown error reason: {s}")))
        })
        .transpose()?;

    Ok(Job {
        id,
        content_hash: row.get("content_hash"),
        media_kind,
        state,
        source_channel,
        attempt_count: row.get("attempt_count"),
        result_text: row.get("result_text"),
        confidence: row.get("confidence"),
        error_reason,
        next_eligible_at: ms_to_datetime(row.get("next_eligible_at")),
        claimed_at: row.get::<Option<i64>, _>("claimed_at").map(ms_to_datetime),
        created_at: ms_to_datetime(row.get("created_at")),
        updated_at: ms_to_datetime(row.get("updated_at")),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation))
        .unwrap_or(false)
}

/// Submit new content or reuse the in-flight job for identical content
///
/// Inserts a queued job, or, when a job with the same content hash is
/// already queued or processing, returns that job's id. The partial unique
/// index on in-flight hashes makes the check-and-insert atomic, so two
/// concurrent submissions of identical bytes can never both insert.
pub async fn submit_or_reuse(
    pool: &SqlitePool,
    content_hash: &str,
    media_kind: MediaKind,
    source_channel: SourceChannel,
    payload: &[u8],
) -> Result<SubmitOutcome> {
    // Bounded retry: the in-flight job can reach a terminal state between
    // our failed insert and the lookup, leaving neither row to reuse.
    for _ in 0..3 {
        let id = Uuid::new_v4();
        let now = now_ms();

        let insert = sqlx::query(
            r#"
            INSERT INTO jobs (id, content_hash, media_kind, state, source_channel,
                              attempt_count, payload, next_eligible_at, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(content_hash)
        .bind(media_kind.as_str())
        .bind(source_channel.as_str())
        .bind(payload)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await;

        match insert {
            Ok(_) => {
                return Ok(SubmitOutcome {
                    job_id: id,
                    deduplicated: false,
                })
            }
            Err(err) if is_unique_violation(&err) => {
                let existing: Option<String> = sqlx::query_scalar(
                    r#"
                    SELECT id FROM jobs
                    WHERE content_hash = ? AND state IN ('queued', 'processing')
                    LIMIT 1
                    "#,
                )
                .bind(content_hash)
                .fetch_optional(pool)
                .await?;

                match existing {
                    Some(id_str) => {
                        let job_id = Uuid::parse_str(&id_str).map_err(|e| {
                            Error::Internal(format!("corrupt job id {id_str}: {e}"))
                        })?;
                        return Ok(SubmitOutcome {
                            job_id,
                            deduplicated: true,
                        });
                    }
                    None => continue,
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(Error::Internal(format!(
        "submission for {content_hash} kept racing in-flight completion"
    )))
}

/// Atomically claim the oldest eligible queued job of a kind
///
/// Transitions exactly one queued job to processing, increments its attempt
/// count, and stamps the lease. Among eligible rows the oldest `created_at`
/// wins (FIFO within kind); rows whose `next_eligible_at` is still in the
/// future are skipped. The conditional UPDATE is the lock: at most one
/// claimant can ever observe `state = 'queued'` for a given row.
pub async fn claim_next_queued(
    pool: &SqlitePool,
    media_kind: MediaKind,
) -> Result<Option<ClaimedJob>> {
    let now = now_ms();

    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'processing',
            attempt_count = attempt_count + 1,
            claimed_at = ?,
            updated_at = ?
        WHERE id = (
            SELECT id FROM jobs
            WHERE media_kind = ? AND state = 'queued' AND next_eligible_at <= ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1
        ) AND state = 'queued'
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(media_kind.as_str())
    .bind(now)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let payload = row.get::<Option<Vec<u8>>, _>("payload").unwrap_or_default();
            let job = job_from_row(&row)?;
            Ok(Some(ClaimedJob { job, payload }))
        }
        None => Ok(None),
    }
}

/// Commit a successful recognition: processing -> completed
///
/// Fails with `InvalidTransition` when the job is not currently processing
/// (lost or duplicate lease). The payload is dropped on completion.
pub async fn commit_result(
    pool: &SqlitePool,
    job_id: Uuid,
    text: &str,
    confidence: f64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'completed',
            result_text = ?,
            confidence = ?,
            error_reason = NULL,
            payload = NULL,
            claimed_at = NULL,
            updated_at = ?
        WHERE id = ? AND state = 'processing'
        "#,
    )
    .bind(text)
    .bind(confidence)
    .bind(now_ms())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::InvalidTransition(format!(
            "cannot complete job {job_id}: not in processing state"
        )));
    }

    Ok(())
}

/// Commit a failed attempt: processing -> queued (retry) or -> permanently_failed
///
/// Retryable reasons re-queue with the caller-computed backoff gate until
/// `max_attempts` is reached; non-retryable reasons and exhausted attempts
/// are terminal. One conditional UPDATE decides the branch from the row's
/// own attempt count, so a lost lease cannot slip between a check and the
/// write; a job not currently processing fails with `InvalidTransition`.
/// Returns the resulting state.
pub async fn commit_failure(
    pool: &SqlitePool,
    job_id: Uuid,
    reason: ErrorReason,
    max_attempts: u32,
    next_eligible_at: DateTime<Utc>,
) -> Result<JobState> {
    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET state = CASE WHEN ?1 AND attempt_count < ?2
                THEN 'queued' ELSE 'permanently_failed' END,
            error_reason = CASE WHEN ?1 AND attempt_count < ?2
                THEN NULL ELSE ?3 END,
            payload = CASE WHEN ?1 AND attempt_count < ?2
                THEN payload ELSE NULL END,
            next_eligible_at = CASE WHEN ?1 AND attempt_count < ?2
                THEN ?4 ELSE next_eligible_at END,
            claimed_at = NULL,
            updated_at = ?5
        WHERE id = ?6 AND state = 'processing'
        RETURNING state
        "#,
    )
    .bind(reason.is_retryable())
    .bind(i64::from(max_attempts))
    .bind(reason.as_str())
    .bind(next_eligible_at.timestamp_millis())
    .bind(now_ms())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| {
        Error::InvalidTransition(format!("cannot fail job {job_id}: not in processing state"))
    })?;

    let state_str: String = row.get("state");
    JobState::parse(&state_str)
        .ok_or_else(|| Error::Internal(format!("unknown job state: {state_str}")))
}

/// Read-only lookup by id
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Job> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => job_from_row(&row),
        None => Err(Error::NotFound(format!("job {job_id}"))),
    }
}

/// Recent jobs, newest first, optionally filtered by state
pub async fn list_recent(
    pool: &SqlitePool,
    state: Option<JobState>,
    limit: i64,
) -> Result<Vec<Job>> {
    let rows = match state {
        Some(state) => {
            sqlx::query(
                "SELECT * FROM jobs WHERE state = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(state.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(job_from_row).collect()
}

/// Sweep processing jobs whose lease has gone stale (crash recovery)
///
/// A job still marked processing past the stale-lease threshold is presumed
/// to belong to a crashed worker. The attempt it consumed stays counted:
/// a job below the attempt ceiling becomes immediately claimable again,
/// while one that crashed on its final attempt goes terminal with
/// `worker_lost` so it can never re-enter the queue past the ceiling.
/// Returns the number of swept jobs.
pub async fn recover_stale_leases(
    pool: &SqlitePool,
    stale_after: std::time::Duration,
    max_attempts: u32,
) -> Result<u64> {
    let now = now_ms();
    let cutoff = now - stale_after.as_millis() as i64;

    let mut tx = pool.begin().await?;

    let exhausted = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'permanently_failed',
            error_reason = ?,
            payload = NULL,
            claimed_at = NULL,
            updated_at = ?
        WHERE state = 'processing' AND claimed_at IS NOT NULL AND claimed_at <= ?
          AND attempt_count >= ?
        "#,
    )
    .bind(ErrorReason::WorkerLost.as_str())
    .bind(now)
    .bind(cutoff)
    .bind(i64::from(max_attempts))
    .execute(&mut *tx)
    .await?;

    let requeued = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'queued',
            claimed_at = NULL,
            next_eligible_at = ?,
            updated_at = ?
        WHERE state = 'processing' AND claimed_at IS NOT NULL AND claimed_at <= ?
          AND attempt_count < ?
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(cutoff)
    .bind(i64::from(max_attempts))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(exhausted.rows_affected() + requeued.rows_affected())
}

/// Number of queued jobs of a kind (queue depth gauge)
pub async fn queue_depth(pool: &SqlitePool, media_kind: MediaKind) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE media_kind = ? AND state = 'queued'")
            .bind(media_kind.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// ============================================================================
// Tests
// ============================================================================
