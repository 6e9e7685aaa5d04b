//! Recognition engine adapters
//!
//! HTTP clients for the external OCR and speech-to-text services. Both
//! implement the `Recognizer` capability; their internal models are opaque
//! to the pipeline.

pub mod ocr;
pub mod speech;

pub use ocr::OcrEngine;
pub use speech::SpeechEngine;

use std::time::Duration;

use crate::types::RecognizeError;

/// Map a transport-level failure onto the engine error taxonomy
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> RecognizeError {
    if err.is_timeout() {
        RecognizeError::Timeout(timeout)
    } else {
        RecognizeError::Unavailable(err.to_string())
    }
}

/// Map a non-success HTTP status onto the engine error taxonomy
///
/// Client errors mean the engine looked at the content and refused it
/// (non-retryable); anything else is treated as the engine being
/// unavailable (retryable).
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> RecognizeError {
    if status.is_client_error() {
        RecognizeError::Rejected(format!("{status}: {body}"))
    } else {
        RecognizeError::Unavailable(format!("engine returned {status}"))
    }
}
