//! Configuration resolution for mediatext
//!
//! Priority: environment variables override the TOML config file, which
//! overrides compiled defaults. The config file lives at
//! `$MEDIATEXT_CONFIG` or `~/.config/mediatext/config.toml`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address
    pub bind_address: String,
    /// SQLite database file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,

    /// Base URL of the OCR service
    pub ocr_endpoint: String,
    pub ocr_api_key: Option<String>,
    /// Language hints forwarded to the OCR engine
    pub ocr_languages: String,

    /// Base URL of the speech-to-text service
    pub speech_endpoint: String,
    pub speech_api_key: Option<String>,

    /// Concurrency bound of the image worker pool
    pub image_workers: usize,
    /// Concurrency bound of the audio worker pool
    pub audio_workers: usize,
    /// Attempt ceiling for retryable failures
    pub max_attempts: u32,
    /// Per-call engine timeout
    pub engine_timeout_secs: u64,
    /// First retry delay; doubles per attempt
    pub retry_base_ms: u64,
    /// Retry delay cap
    pub retry_max_ms: u64,
    /// Age past which a processing lease is presumed crashed
    pub stale_lease_secs: u64,
    /// Idle worker sleep between claim polls
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5810".to_string(),
            database_path: None,
            ocr_endpoint: "http://127.0.0.1:9000".to_string(),
            ocr_api_key: None,
            ocr_languages: "eng".to_string(),
            speech_endpoint: "http://127.0.0.1:9001".to_string(),
            speech_api_key: None,
            image_workers: 2,
            audio_workers: 2,
            max_attempts: 3,
            engine_timeout_secs: 30,
            retry_base_ms: 1_000,
            retry_max_ms: 60_000,
            stale_lease_secs: 120,
            poll_interval_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration: TOML file, then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?
            }
            _ => Config::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_string("MEDIATEXT_BIND_ADDRESS", &mut self.bind_address);
        if let Ok(path) = std::env::var("MEDIATEXT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        env_string("MEDIATEXT_OCR_ENDPOINT", &mut self.ocr_endpoint);
        env_opt_string("MEDIATEXT_OCR_API_KEY", &mut self.ocr_api_key);
        env_string("MEDIATEXT_OCR_LANGUAGES", &mut self.ocr_languages);
        env_string("MEDIATEXT_SPEECH_ENDPOINT", &mut self.speech_endpoint);
        env_opt_string("MEDIATEXT_SPEECH_API_KEY", &mut self.speech_api_key);
        env_parse("MEDIATEXT_IMAGE_WORKERS", &mut self.image_workers);
        env_parse("MEDIATEXT_AUDIO_WORKERS", &mut self.audio_workers);
        env_parse("MEDIATEXT_MAX_ATTEMPTS", &mut self.max_attempts);
        env_parse("MEDIATEXT_ENGINE_TIMEOUT_SECS", &mut self.engine_timeout_secs);
        env_parse("MEDIATEXT_RETRY_BASE_MS", &mut self.retry_base_ms);
        env_parse("MEDIATEXT_RETRY_MAX_MS", &mut self.retry_max_ms);
        env_parse("MEDIATEXT_STALE_LEASE_SECS", &mut self.stale_lease_secs);
        env_parse("MEDIATEXT_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_workers == 0 || self.audio_workers == 0 {
            return Err(Error::Config(
                "worker pool sizes must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        // A lease younger than an engine call could be swept out from under
        // a live worker
        if self.stale_lease_secs <= self.engine_timeout_secs {
            return Err(Error::Config(format!(
                "stale_lease_secs ({}) must exceed engine_timeout_secs ({})",
                self.stale_lease_secs, self.engine_timeout_secs
            )));
        }
        Ok(())
    }

    /// Resolved database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("mediatext").join("mediatext.db"))
                .unwrap_or_else(|| PathBuf::from("./mediatext.db"))
        })
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn stale_lease_after(&self) -> Duration {
        Duration::from_secs(self.stale_lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MEDIATEXT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("mediatext").join("config.toml"))
}

fn env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn env_opt_string(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("ignoring unparsable {}={}", name, value),
        }
    }
}
