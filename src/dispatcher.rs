//! Worker pool dispatcher
//!
//! Pulls queued jobs out of the store and drives them through the matching
//! recognition engine. One pool per media kind with independent concurrency
//! bounds, so a slow engine for one kind never starves the other. Workers
//! poll with a sleep when idle, and on shutdown each finishes (commits) its
//! in-flight job before exiting.
//!
//! No database transaction is ever held across an engine call: a claim is
//! one atomic statement, the engine runs, then the commit is another.

use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db;
use crate::db::jobs::ClaimedJob;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::types::{ErrorReason, JobState, MediaKind, Recognizer};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrency bound for the image (OCR) pool
    pub image_workers: usize,
    /// Concurrency bound for the audio (speech) pool
    pub audio_workers: usize,
    /// Attempt ceiling before a retryable failure becomes terminal
    pub max_attempts: u32,
    /// Per-call engine timeout
    pub engine_timeout: Duration,
    /// First retry delay; doubles per attempt
    pub retry_base: Duration,
    /// Retry delay cap
    pub retry_max: Duration,
    /// Idle worker sleep between claim polls
    pub poll_interval: Duration,
    /// Age past which a processing lease is presumed crashed
    pub stale_lease_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            image_workers: 2,
            audio_workers: 2,
            max_attempts: 3,
            engine_timeout: Duration::from_secs(30),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            stale_lease_after: Duration::from_secs(120),
        }
    }
}

impl From<&Config> for DispatcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            image_workers: config.image_workers,
            audio_workers: config.audio_workers,
            max_attempts: config.max_attempts,
            engine_timeout: config.engine_timeout(),
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
            poll_interval: config.poll_interval(),
            stale_lease_after: config.stale_lease_after(),
        }
    }
}

/// Per-kind worker pools over the job store
pub struct Dispatcher {
    db: SqlitePool,
    metrics: Arc<Metrics>,
    config: DispatcherConfig,
    engines: HashMap<MediaKind, Arc<dyn Recognizer>>,
}

impl Dispatcher {
    pub fn new(db: SqlitePool, metrics: Arc<Metrics>, config: DispatcherConfig) -> Self {
        Self {
            db,
            metrics,
            config,
            engines: HashMap::new(),
        }
    }

    /// Register a recognition engine for its media kind
    pub fn register_engine(&mut self, engine: Arc<dyn Recognizer>) {
        debug!(
            engine = engine.name(),
            kind = engine.media_kind().as_str(),
            "engine registered"
        );
        self.engines.insert(engine.media_kind(), engine);
    }

    /// Sweep jobs stuck in processing from a crashed run
    pub async fn recover(&self) -> Result<u64> {
        let recovered = db::jobs::recover_stale_leases(
            &self.db,
            self.config.stale_lease_after,
            self.config.max_attempts,
        )
        .await?;
        if recovered > 0 {
            info!(recovered, "swept jobs with stale leases");
        }
        Ok(recovered)
    }

    /// Spawn the worker pools and the periodic stale-lease sweep
    ///
    /// Workers run until `shutdown` is cancelled, each finishing its
    /// in-flight job first. The caller drains the returned set to wait for
    /// that.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        for kind in MediaKind::ALL {
            let workers = match kind {
                MediaKind::Image => self.config.image_workers,
                MediaKind::Audio => self.config.audio_workers,
            };
            for worker_id in 0..workers {
                let dispatcher = Arc::clone(&self);
                let token = shutdown.clone();
                tasks.spawn(async move {
                    dispatcher.worker_loop(kind, worker_id, token).await;
                });
            }
        }

        let dispatcher = Arc::clone(&self);
        let token = shutdown.clone();
        tasks.spawn(async move {
            dispatcher.sweep_loop(token).await;
        });

        info!(
            image_workers = self.config.image_workers,
            audio_workers = self.config.audio_workers,
            "dispatcher started"
        );

        tasks
    }

    async fn sweep_loop(&self, shutdown: CancellationToken) {
        // Half the threshold keeps the worst-case stuck window near the
        // threshold itself rather than twice it
        let cadence = self.config.stale_lease_after / 2;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(cadence) => {}
            }
            if let Err(e) = self.recover().await {
                warn!(error = %e, "stale-lease sweep failed");
            }
        }
    }

    async fn worker_loop(&self, kind: MediaKind, worker_id: usize, shutdown: CancellationToken) {
        debug!(kind = kind.as_str(), worker_id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match db::jobs::claim_next_queued(&self.db, kind).await {
                Ok(Some(claimed)) => {
                    // The claimed job is always driven to a commit, even
                    // mid-shutdown; the loop re-checks the token afterwards.
                    if let Err(e) = self.process(claimed).await {
                        error!(kind = kind.as_str(), worker_id, error = %e,
                            "integrity error while committing job outcome");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(kind = kind.as_str(), worker_id, error = %e, "claim failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        debug!(kind = kind.as_str(), worker_id, "worker stopped");
    }

    async fn process(&self, claimed: ClaimedJob) -> Result<()> {
        let job = claimed.job;

        let Some(engine) = self.engines.get(&job.media_kind) else {
            // No adapter registered for this kind: content-level, terminal
            warn!(job_id = %job.id, kind = job.media_kind.as_str(), "no engine registered");
            db::jobs::commit_failure(
                &self.db,
                job.id,
                ErrorReason::UnsupportedMediaKind,
                self.config.max_attempts,
                Utc::now(),
            )
            .await?;
            self.metrics
                .record_failure(job.media_kind, ErrorReason::UnsupportedMediaKind);
            return Ok(());
        };

        debug!(
            job_id = %job.id,
            engine = engine.name(),
            attempt = job.attempt_count,
            "dispatching job"
        );

        let started = Instant::now();
        let outcome = engine
            .recognize(&claimed.payload, self.config.engine_timeout)
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(recognition) => {
                db::jobs::commit_result(&self.db, job.id, &recognition.text, recognition.confidence)
                    .await?;
                self.metrics.record_completed(job.media_kind, elapsed);
                info!(
                    job_id = %job.id,
                    kind = job.media_kind.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    confidence = recognition.confidence,
                    "job completed"
                );
            }
            Err(err) => {
                let reason = err.reason();
                self.metrics.record_failure(job.media_kind, reason);

                let delay = self.backoff_delay(job.attempt_count as u32);
                let next_eligible_at =
                    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);

                let new_state = db::jobs::commit_failure(
                    &self.db,
                    job.id,
                    reason,
                    self.config.max_attempts,
                    next_eligible_at,
                )
                .await?;

                match new_state {
                    JobState::Queued => warn!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        reason = reason.as_str(),
                        retry_in_ms = delay.as_millis() as u64,
                        "transient engine failure, job re-queued"
                    ),
                    _ => warn!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        reason = reason.as_str(),
                        "job permanently failed"
                    ),
                }
            }
        }

        Ok(())
    }

    /// Retry delay for the attempt that just failed: exponential doubling
    /// from `retry_base` capped at `retry_max`, with half-jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base_ms = self.config.retry_base.as_millis() as u64;
        let cap_ms = self.config.retry_max.as_millis() as u64;
        let capped = base_ms.saturating_mul(1u64 << exp).min(cap_ms);

        let half = capped / 2;
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        Duration::from_millis(half + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_dispatcher(config: DispatcherConfig) -> Dispatcher {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        Dispatcher::new(pool, Arc::new(Metrics::new()), config)
    }

    #[tokio::test]
    async fn test_backoff_grows_and_caps() {
        let dispatcher = test_dispatcher(DispatcherConfig {
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_millis(800),
            ..Default::default()
        })
        .await;

        for _ in 0..20 {
            // attempt 1: capped delay 100ms, jittered within [50, 100]
            let d1 = dispatcher.backoff_delay(1);
            assert!(d1 >= Duration::from_millis(50) && d1 <= Duration::from_millis(100));

            // attempt 3: 100 * 2^2 = 400ms, jittered within [200, 400]
            let d3 = dispatcher.backoff_delay(3);
            assert!(d3 >= Duration::from_millis(200) && d3 <= Duration::from_millis(400));

            // far past the cap
            let d9 = dispatcher.backoff_delay(9);
            assert!(d9 <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_backoff_handles_zero_base() {
        let dispatcher = test_dispatcher(DispatcherConfig {
            retry_base: Duration::ZERO,
            retry_max: Duration::ZERO,
            ..Default::default()
        })
        .await;
        assert_eq!(dispatcher.backoff_delay(1), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_permanently() {
        let dispatcher = test_dispatcher(DispatcherConfig::default()).await;

        let outcome = db::jobs::submit_or_reuse(
            &dispatcher.db,
            "h1",
            MediaKind::Image,
            crate::types::SourceChannel::Api,
            b"png",
        )
        .await
        .unwrap();
        let claimed = db::jobs::claim_next_queued(&dispatcher.db, MediaKind::Image)
            .await
            .unwrap()
            .unwrap();

        dispatcher.process(claimed).await.unwrap();

        let job = db::jobs::get(&dispatcher.db, outcome.job_id).await.unwrap();
        assert_eq!(job.state, JobState::PermanentlyFailed);
        assert_eq!(job.error_reason, Some(ErrorReason::UnsupportedMediaKind));
    }
}
