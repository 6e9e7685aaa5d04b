//! Crash recovery tests
//!
//! A job left in processing past the stale-lease threshold (worker crashed
//! mid-job) must be re-queued by the recovery sweep and still reach a
//! terminal state afterwards.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mediatext::db;
use mediatext::dispatcher::{Dispatcher, DispatcherConfig};
use mediatext::metrics::Metrics;
use mediatext::types::{
    ErrorReason, JobState, MediaKind, Recognition, RecognizeError, Recognizer, SourceChannel,
};

struct EchoEngine;

#[async_trait::async_trait]
impl Recognizer for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn recognize(
        &self,
        _bytes: &[u8],
        _timeout: Duration,
    ) -> Result<Recognition, RecognizeError> {
        Ok(Recognition {
            text: "recovered".to_string(),
            confidence: 1.0,
        })
    }
}

#[tokio::test]
async fn test_stale_lease_requeued_and_completed_after_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");

    // First run: claim a job and "crash" without committing
    let pool = db::init_database_pool(&db_path).await.unwrap();
    let submitted =
        db::jobs::submit_or_reuse(&pool, "h1", MediaKind::Image, SourceChannel::Api, b"png")
            .await
            .unwrap();
    let claimed = db::jobs::claim_next_queued(&pool, MediaKind::Image)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.job.state, JobState::Processing);
    pool.close().await;
    drop(pool);

    // Simulated restart: reopen the database, age the lease past the
    // threshold, and run the startup sweep
    let pool = db::init_database_pool(&db_path).await.unwrap();
    sqlx::query("UPDATE jobs SET claimed_at = claimed_at - 600000 WHERE id = ?")
        .bind(submitted.job_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let config = DispatcherConfig {
        poll_interval: Duration::from_millis(10),
        stale_lease_after: Duration::from_secs(300),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(pool.clone(), Arc::new(Metrics::new()), config);
    dispatcher.register_engine(Arc::new(EchoEngine));
    let dispatcher = Arc::new(dispatcher);

    let recovered = dispatcher.recover().await.unwrap();
    assert_eq!(recovered, 1);

    let job = db::jobs::get(&pool, submitted.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.attempt_count, 1);

    // The restarted worker pool drives it to completion
    let shutdown = CancellationToken::new();
    let mut workers = dispatcher.spawn(shutdown.clone());

    let mut terminal = None;
    for _ in 0..500 {
        let job = db::jobs::get(&pool, submitted.job_id).await.unwrap();
        if job.state.is_terminal() {
            terminal = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let job = terminal.expect("job never reached a terminal state after recovery");
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.result_text.as_deref(), Some("recovered"));
    assert_eq!(job.attempt_count, 2);

    shutdown.cancel();
    while workers.join_next().await.is_some() {}
}

#[tokio::test]
async fn test_crash_on_final_attempt_goes_terminal_not_queued() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");

    // First run crashes while holding the lease for the only allowed attempt
    let pool = db::init_database_pool(&db_path).await.unwrap();
    let submitted =
        db::jobs::submit_or_reuse(&pool, "h1", MediaKind::Image, SourceChannel::Api, b"png")
            .await
            .unwrap();
    db::jobs::claim_next_queued(&pool, MediaKind::Image)
        .await
        .unwrap()
        .unwrap();
    pool.close().await;
    drop(pool);

    let pool = db::init_database_pool(&db_path).await.unwrap();
    sqlx::query("UPDATE jobs SET claimed_at = claimed_at - 600000 WHERE id = ?")
        .bind(submitted.job_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let config = DispatcherConfig {
        max_attempts: 1,
        stale_lease_after: Duration::from_secs(300),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(pool.clone(), Arc::new(Metrics::new()), config);
    dispatcher.register_engine(Arc::new(EchoEngine));
    let dispatcher = Arc::new(dispatcher);

    let recovered = dispatcher.recover().await.unwrap();
    assert_eq!(recovered, 1);

    // The attempt ceiling holds across the crash: terminal, not re-queued
    let job = db::jobs::get(&pool, submitted.job_id).await.unwrap();
    assert_eq!(job.state, JobState::PermanentlyFailed);
    assert_eq!(job.error_reason, Some(ErrorReason::WorkerLost));
    assert_eq!(job.attempt_count, 1);
    assert!(db::jobs::claim_next_queued(&pool, MediaKind::Image)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_periodic_sweep_recovers_without_restart() {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database_pool(&dir.path().join("jobs.db"))
        .await
        .unwrap();

    // A lease orphaned while the service keeps running
    let submitted =
        db::jobs::submit_or_reuse(&pool, "h1", MediaKind::Image, SourceChannel::Api, b"png")
            .await
            .unwrap();
    db::jobs::claim_next_queued(&pool, MediaKind::Image)
        .await
        .unwrap()
        .unwrap();
    sqlx::query("UPDATE jobs SET claimed_at = claimed_at - 600000 WHERE id = ?")
        .bind(submitted.job_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let config = DispatcherConfig {
        poll_interval: Duration::from_millis(10),
        stale_lease_after: Duration::from_millis(400),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(pool.clone(), Arc::new(Metrics::new()), config);
    dispatcher.register_engine(Arc::new(EchoEngine));
    let dispatcher = Arc::new(dispatcher);

    // No startup recover(): only the in-process sweep can rescue it
    let shutdown = CancellationToken::new();
    let mut workers = dispatcher.spawn(shutdown.clone());

    let mut terminal = None;
    for _ in 0..500 {
        let job = db::jobs::get(&pool, submitted.job_id).await.unwrap();
        if job.state.is_terminal() {
            terminal = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let job = terminal.expect("periodic sweep never rescued the orphaned lease");
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 2);

    shutdown.cancel();
    while workers.join_next().await.is_some() {}
}

#[tokio::test]
async fn test_fresh_lease_survives_sweep() {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database_pool(&dir.path().join("jobs.db"))
        .await
        .unwrap();

    let submitted =
        db::jobs::submit_or_reuse(&pool, "h1", MediaKind::Image, SourceChannel::Api, b"png")
            .await
            .unwrap();
    db::jobs::claim_next_queued(&pool, MediaKind::Image)
        .await
        .unwrap()
        .unwrap();

    let recovered = db::jobs::recover_stale_leases(&pool, Duration::from_secs(300), 3)
        .await
        .unwrap();
    assert_eq!(recovered, 0);

    let job = db::jobs::get(&pool, submitted.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Processing);
}
