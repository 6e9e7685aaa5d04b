//! Core types and trait definitions for mediatext
//!
//! Defines the job model shared by the store, dispatcher, and API, plus the
//! `Recognizer` capability both engine adapters implement. The dispatcher
//! depends only on the trait, so a third media kind is a new impl rather
//! than a change to dispatch logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Supported media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Image, MediaKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

/// Job lifecycle state
///
/// Transitions: Queued -> Processing -> {Completed | Queued (retry) |
/// PermanentlyFailed}. A retrying job re-enters Queued with a future
/// `next_eligible_at`; only terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    PermanentlyFailed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::PermanentlyFailed => "permanently_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "permanently_failed" => Some(JobState::PermanentlyFailed),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::PermanentlyFailed)
    }
}

/// Ingress channel a job arrived through (audit/metrics only, never affects
/// processing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Bot,
    Api,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::Bot => "bot",
            SourceChannel::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bot" => Some(SourceChannel::Bot),
            "api" => Some(SourceChannel::Api),
            _ => None,
        }
    }
}

/// Error taxonomy code persisted with failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Byte signature matched no supported format (non-retryable)
    UnsupportedMediaKind,
    /// Engine could not be reached or returned a server error (retryable)
    EngineUnavailable,
    /// Engine did not answer within the configured timeout (retryable)
    EngineTimeout,
    /// Engine determined the content is unprocessable (non-retryable)
    EngineRejected,
    /// Worker crashed holding the lease; recorded when the stale-lease sweep
    /// finds the job already at its attempt ceiling
    WorkerLost,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::UnsupportedMediaKind => "unsupported_media_kind",
            ErrorReason::EngineUnavailable => "engine_unavailable",
            ErrorReason::EngineTimeout => "engine_timeout",
            ErrorReason::EngineRejected => "engine_rejected",
            ErrorReason::WorkerLost => "worker_lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unsupported_media_kind" => Some(ErrorReason::UnsupportedMediaKind),
            "engine_unavailable" => Some(ErrorReason::EngineUnavailable),
            "engine_timeout" => Some(ErrorReason::EngineTimeout),
            "engine_rejected" => Some(ErrorReason::EngineRejected),
            "worker_lost" => Some(ErrorReason::WorkerLost),
            _ => None,
        }
    }

    /// Transient failures re-queue with backoff; the rest are terminal
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorReason::EngineUnavailable | ErrorReason::EngineTimeout | ErrorReason::WorkerLost
        )
    }
}

// ============================================================================
// Job model
// ============================================================================

/// One unit of submitted media awaiting or having undergone recognition
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    /// SHA-256 hex digest of the raw media bytes, used for deduplication
    pub content_hash: String,
    pub media_kind: MediaKind,
    pub state: JobState,
    pub source_channel: SourceChannel,
    /// Dispatch attempts consumed so far (incremented on claim)
    pub attempt_count: i64,
    /// Recognized text, set only when completed
    pub result_text: Option<String>,
    /// Engine-reported confidence (0.0-1.0), set only when completed
    pub confidence: Option<f64>,
    /// Failure taxonomy code, set only in failure states
    pub error_reason: Option<ErrorReason>,
    /// Earliest instant a queued job may be claimed (retry backoff gate)
    pub next_eligible_at: DateTime<Utc>,
    /// Lease timestamp while processing; cleared on commit
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Recognition engine capability
// ============================================================================

/// Successful recognition output
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine confidence (0.0-1.0)
    pub confidence: f64,
}

/// Failure modes of a recognition engine call
#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine rejected content: {0}")]
    Rejected(String),
}

impl RecognizeError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            RecognizeError::Unavailable(_) => ErrorReason::EngineUnavailable,
            RecognizeError::Timeout(_) => ErrorReason::EngineTimeout,
            RecognizeError::Rejected(_) => ErrorReason::EngineRejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.reason().is_retryable()
    }
}

/// Recognition engine adapter
///
/// Both engine variants (OCR for images, speech-to-text for audio) satisfy
/// this capability. Implementations must be safe to invoke concurrently from
/// multiple workers; each invocation is independent with no shared mutable
/// state.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Engine name for logging and provenance
    fn name(&self) -> &'static str;

    /// Media kind this engine handles
    fn media_kind(&self) -> MediaKind;

    /// Convert raw media bytes to text within the given timeout
    async fn recognize(
        &self,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<Recognition, RecognizeError>;
}

// ============================================================================
// Tests
// ============================================================================
