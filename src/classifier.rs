//! Content classification
//!
//! Determines a submitted item's media kind from its byte signature and its
//! canonical identity (SHA-256 content hash). Pure and deterministic: the
//! same bytes always produce the same kind and hash.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::MediaKind;

/// Classification outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: MediaKind,
    /// SHA-256 hex digest of the raw bytes
    pub content_hash: String,
}

/// Classify raw media bytes
///
/// Fails with `UnsupportedMediaKind` when the byte signature matches neither
/// a supported image nor audio format.
pub fn classify(bytes: &[u8]) -> Result<Classified> {
    let kind = match infer::get(bytes) {
        Some(t) if t.matcher_type() == infer::MatcherType::Image => MediaKind::Image,
        Some(t) if t.matcher_type() == infer::MatcherType::Audio => MediaKind::Audio,
        _ => return Err(Error::UnsupportedMediaKind),
    };

    let hash = Sha256::digest(bytes);
    Ok(Classified {
        kind,
        content_hash: format!("{:x}", hash),
    })
}
