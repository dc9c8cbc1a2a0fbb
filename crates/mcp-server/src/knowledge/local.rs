//! Filesystem-backed object store for development and tests.

use super::{decode_utf8, FetchError, KnowledgeDocument, KnowledgeLocation, KnowledgeSource};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Reads `{root}/{bucket}/{key}`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, location: &KnowledgeLocation) -> Result<PathBuf, FetchError> {
        let relative = Path::new(&location.bucket).join(&location.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || location.bucket.is_empty() || location.key.is_empty() {
            return Err(FetchError::access_denied(location, "object path escapes the store root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl KnowledgeSource for LocalObjectStore {
    async fn fetch(&self, location: &KnowledgeLocation) -> Result<KnowledgeDocument, FetchError> {
        let path = self.object_path(location)?;
        debug!("Reading knowledge document {} from {}", location, path.display());

        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => FetchError::not_found(location),
            ErrorKind::PermissionDenied => FetchError::access_denied(location, e),
            _ => FetchError::transport(location, e),
        })?;

        decode_utf8(location, bytes)
    }
}
