//! OCR engine adapter
//!
//! Posts image bytes to the remote OCR service and returns the extracted
//! text. Language hints are forwarded so multi-script documents (the
//! original deployment read bank statements in five scripts) recognize
//! correctly.

use serde::Deserialize;
use std::time::Duration;

use super::{status_error, transport_error};
use crate::types::{MediaKind, Recognition, RecognizeError, Recognizer};

/// Remote OCR service client
pub struct OcrEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    /// Language hint string passed through to the engine (e.g. "hin+eng")
    languages: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl OcrEngine {
    pub fn new(endpoint: String, api_key: Option<String>, languages: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            languages,
        }
    }
}

#[async_trait::async_trait]
impl Recognizer for OcrEngine {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn recognize(
        &self,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<Recognition, RecognizeError> {
        let url = format!("{}/v1/ocr", self.endpoint.trim_end_matches('/'));

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("languages", self.languages.as_str())])
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

        let parsed: OcrResponse = response
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
        let engine = OcrEngine::new("http://localhost:9000".into(), None, "eng".into());
        assert_eq!(engine.name(), "ocr");
        assert_eq!(engine.media_kind(), MediaKind::Image);
    }

    #[test]
    fn test_response_parsing_defaults_confidence() {
        let parsed: OcrResponse = serde_json::from_str(r#"{"text": "INVOICE #42"}"#).unwrap();
        assert_eq!(parsed.text, "INVOICE #42");
        assert_eq!(parsed.confidence, 0.0);

        let parsed: OcrResponse =
            serde_json::from_str(r#"{"text": "INVOICE #42", "confidence": 0.91}"#).unwrap();
        assert_eq!(parsed.confidence, 0.91);
    }
}
