//! Operational metrics
//!
//! Lock-free counters and a fixed-bucket latency histogram, incremented by
//! the dispatcher and the ingress layer and read out as a serializable
//! snapshot. Queue depth is derived from the job store at snapshot time, so
//! it lives in the metrics API handler rather than here.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::{ErrorReason, MediaKind};

/// Histogram bucket upper bounds in seconds
const LATENCY_BUCKETS: [f64; 10] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Processing-latency histogram (cumulative buckets plus sum/count)
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            buckets: LATENCY_BUCKETS
                .iter()
                .zip(self.buckets.iter())
                .map(|(le, c)| BucketSnapshot {
                    le: *le,
                    count: c.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

/// Per-reason failure counters
#[derive(Default)]
struct FailureCounters {
    unsupported_media_kind: AtomicU64,
    engine_unavailable: AtomicU64,
    engine_timeout: AtomicU64,
    engine_rejected: AtomicU64,
    worker_lost: AtomicU64,
}

impl FailureCounters {
    fn counter(&self, reason: ErrorReason) -> &AtomicU64 {
        match reason {
            ErrorReason::UnsupportedMediaKind => &self.unsupported_media_kind,
            ErrorReason::EngineUnavailable => &self.engine_unavailable,
            ErrorReason::EngineTimeout => &self.engine_timeout,
            ErrorReason::EngineRejected => &self.engine_rejected,
            ErrorReason::WorkerLost => &self.worker_lost,
        }
    }

    fn snapshot(&self) -> FailureSnapshot {
        FailureSnapshot {
            unsupported_media_kind: self.unsupported_media_kind.load(Ordering::Relaxed),
            engine_unavailable: self.engine_unavailable.load(Ordering::Relaxed),
            engine_timeout: self.engine_timeout.load(Ordering::Relaxed),
            engine_rejected: self.engine_rejected.load(Ordering::Relaxed),
            worker_lost: self.worker_lost.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for one media kind
struct KindMetrics {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: FailureCounters,
    processing_duration: LatencyHistogram,
}

impl KindMetrics {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: FailureCounters::default(),
            processing_duration: LatencyHistogram::new(),
        }
    }

    fn snapshot(&self) -> KindSnapshot {
        KindSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.snapshot(),
            processing_duration: self.processing_duration.snapshot(),
        }
    }
}

/// Metrics sink shared by all workers and handlers
///
/// Append-only; safe for concurrent increment from any task.
pub struct Metrics {
    image: KindMetrics,
    audio: KindMetrics,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            image: KindMetrics::new(),
            audio: KindMetrics::new(),
        }
    }

    fn kind(&self, kind: MediaKind) -> &KindMetrics {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn record_submitted(&self, kind: MediaKind) {
        self.kind(kind).submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A duplicate submission resolved to an existing in-flight job
    pub fn record_deduplicated(&self, kind: MediaKind) {
        self.kind(kind).deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, kind: MediaKind, elapsed: Duration) {
        let metrics = self.kind(kind);
        metrics.completed.fetch_add(1, Ordering::Relaxed);
        metrics.processing_duration.observe(elapsed);
    }

    /// One failed attempt (counted per attempt, not per terminal job)
    pub fn record_failure(&self, kind: MediaKind, reason: ErrorReason) {
        self.kind(kind)
            .failed
            .counter(reason)
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            image: self.image.snapshot(),
            audio: self.audio.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Snapshot types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub image: KindSnapshot,
    pub audio: KindSnapshot,
}

#[derive(Debug, Serialize)]
pub struct KindSnapshot {
    pub submitted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: FailureSnapshot,
    pub processing_duration: HistogramSnapshot,
}

#[derive(Debug, Serialize)]
pub struct FailureSnapshot {
    pub unsupported_media_kind: u64,
    pub engine_unavailable: u64,
    pub engine_timeout: u64,
    pub engine_rejected: u64,
    pub worker_lost: u64,
}

#[derive(Debug, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_seconds: f64,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct BucketSnapshot {
    pub le: f64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_submitted(MediaKind::Image);
        metrics.record_submitted(MediaKind::Image);
        metrics.record_deduplicated(MediaKind::Image);
        metrics.record_submitted(MediaKind::Audio);
        metrics.record_failure(MediaKind::Audio, ErrorReason::EngineTimeout);

        let snap = metrics.snapshot();
        assert_eq!(snap.image.submitted, 2);
        assert_eq!(snap.image.deduplicated, 1);
        assert_eq!(snap.audio.submitted, 1);
        assert_eq!(snap.audio.failed.engine_timeout, 1);
        assert_eq!(snap.audio.failed.engine_rejected, 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.record_completed(MediaKind::Image, Duration::from_millis(80));
        metrics.record_completed(MediaKind::Image, Duration::from_millis(600));

        let hist = metrics.snapshot().image.processing_duration;
        assert_eq!(hist.count, 2);
        // 0.08s falls past the 0.05 bucket, into 0.1 and everything above
        assert_eq!(hist.buckets[0].count, 0);
        assert_eq!(hist.buckets[1].count, 1);
        // both observations fit under 1.0s
        let one_second = hist.buckets.iter().find(|b| b.le == 1.0).unwrap();
        assert_eq!(one_second.count, 2);
        assert!(hist.sum_seconds > 0.6 && hist.sum_seconds < 0.7);
    }
}
