//! Knowledge Source Adapter
//!
//! Fetches the single knowledge document that grounds plan generation. The
//! document is refetched on every request; nothing here caches or retries.

mod http;
mod local;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{KnowledgeBackend, KnowledgeConfig};

/// Where a knowledge document lives in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeLocation {
    pub bucket: String,
    pub key: String,
}

impl KnowledgeLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// True when the key has a `.` or `..` segment. URL paths normalize those
    /// away, so such keys cannot be addressed over HTTP.
    pub fn has_dot_segments(&self) -> bool {
        self.key.split('/').any(|s| s == "." || s == "..")
    }
}

impl fmt::Display for KnowledgeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// A fetched document. Owned by the request that fetched it.
#[derive(Debug, Clone)]
pub struct KnowledgeDocument {
    pub location: KnowledgeLocation,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    pub fn new(location: KnowledgeLocation, content: String) -> Self {
        Self {
            location,
            content,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("knowledge document s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("access denied to knowledge document s3://{bucket}/{key}: {reason}")]
    AccessDenied {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("transport error fetching s3://{bucket}/{key}: {reason}")]
    Transport {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("knowledge document s3://{bucket}/{key} is not valid UTF-8: {reason}")]
    Decode {
        bucket: String,
        key: String,
        reason: String,
    },
}

impl FetchError {
    pub fn not_found(location: &KnowledgeLocation) -> Self {
        FetchError::NotFound {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        }
    }

    pub fn access_denied(location: &KnowledgeLocation, reason: impl ToString) -> Self {
        FetchError::AccessDenied {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(location: &KnowledgeLocation, reason: impl ToString) -> Self {
        FetchError::Transport {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(location: &KnowledgeLocation, reason: impl ToString) -> Self {
        FetchError::Decode {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            reason: reason.to_string(),
        }
    }

    /// Human-readable diagnostic handed back to the calling agent.
    pub fn diagnostic(&self) -> String {
        format!("Failed to fetch knowledge base: {}", self)
    }
}

/// Object-store read boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Read the whole object as UTF-8 text. Partial reads are never returned.
    async fn fetch(&self, location: &KnowledgeLocation) -> Result<KnowledgeDocument, FetchError>;
}

/// Decode fetched bytes, classifying invalid UTF-8 as a decode failure.
pub(crate) fn decode_utf8(
    location: &KnowledgeLocation,
    bytes: Vec<u8>,
) -> Result<KnowledgeDocument, FetchError> {
    let content = String::from_utf8(bytes).map_err(|e| FetchError::decode(location, e))?;
    Ok(KnowledgeDocument::new(location.clone(), content))
}

/// Build the configured knowledge source.
pub fn create_knowledge_source(config: &KnowledgeConfig) -> crate::Result<Arc<dyn KnowledgeSource>> {
    match config.backend {
        KnowledgeBackend::Http => {
            let mut store = HttpObjectStore::new(&config.endpoint)?
                .with_timeout(Duration::from_secs(config.timeout_seconds));
            if let Some(token) = &config.token {
                store = store.with_auth_token(token.clone());
            }
            Ok(Arc::new(store))
        }
        KnowledgeBackend::Local => {
            let root = config.root.clone().ok_or_else(|| {
                crate::Error::Config("KNOWLEDGE_ROOT not configured".to_string())
            })?;
            Ok(Arc::new(LocalObjectStore::new(root)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_the_location() {
        let location = KnowledgeLocation::new("kb", "redshift/rules.md");
        let err = FetchError::access_denied(&location, "403 Forbidden");
        let text = err.diagnostic();
        assert!(text.starts_with("Failed to fetch knowledge base:"));
        assert!(text.contains("s3://kb/redshift/rules.md"));
        assert!(text.contains("403 Forbidden"));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let location = KnowledgeLocation::new("kb", "bad.bin");
        let result = decode_utf8(&location, vec![0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(FetchError::Decode { .. })));
    }

    #[test]
    fn utf8_bytes_become_document() {
        let location = KnowledgeLocation::new("kb", "rules.md");
        let doc = decode_utf8(&location, "Rule 1: vacuum tables weekly.".as_bytes().to_vec()).unwrap();
        assert_eq!(doc.content, "Rule 1: vacuum tables weekly.");
        assert_eq!(doc.location, location);
    }
}
