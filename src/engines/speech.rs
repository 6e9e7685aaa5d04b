//! Speech-to-text engine adapter
//!
//! Posts audio bytes to the remote transcription service. The original
//! deployment's speech library surfaced "could not understand" separately
//! from "service unreachable"; that split maps onto Rejected vs Unavailable
//! here.

use serde::Deserialize;
use std::time::Duration;

use super::{status_error, transport_error};
use crate::types::{MediaKind, Recognition, RecognizeError, Recognizer};

/// Remote speech-to-text service client
pub struct SpeechEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl SpeechEngine {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Recognizer for SpeechEngine {
    fn name(&self) -> &'static str {
        "speech"
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    async fn recognize(
        &self,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<Recognition, RecognizeError> {
        let url = format!("{}/v1/transcribe", self.endpoint.trim_end_matches('/'));

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(timeout)
            .body(bytes.to_vec());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| RecognizeError::Unavailable(format!("malformed engine response: {e}")))?;

        Ok(Recognition {
            text: parsed.text.trim().to_string(),
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_identity() {
        let engine = SpeechEngine::new("http://localhost:9001/".into(), Some("key".into()));
        assert_eq!(engine.name(), "speech");
        assert_eq!(engine.media_kind(), MediaKind::Audio);
    }
}
