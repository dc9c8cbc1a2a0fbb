//! S3-compatible object store over plain HTTP.

use super::{decode_utf8, FetchError, KnowledgeDocument, KnowledgeLocation, KnowledgeSource};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Fetches `{endpoint}/{bucket}/{key}` with path-style addressing.
pub struct HttpObjectStore {
    endpoint: Url,
    client: Client,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str) -> crate::Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            crate::Error::Config(format!("Invalid object store endpoint {:?}: {}", endpoint, e))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(crate::Error::Config(format!(
                "Object store endpoint {} cannot be used as a base URL",
                endpoint
            )));
        }

        Ok(Self {
            endpoint,
            client: Client::new(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        })
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keys are literal: empty segments are kept, so `a//b.md` and `/lead.md`
    /// address the objects with exactly those names.
    fn object_url(&self, location: &KnowledgeLocation) -> Result<Url, FetchError> {
        if location.has_dot_segments() {
            return Err(FetchError::access_denied(
                location,
                "keys with '.' or '..' segments cannot be addressed path-style",
            ));
        }

        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&location.bucket)
                .extend(location.key.split('/'));
        }
        Ok(url)
    }
}

#[async_trait]
impl KnowledgeSource for HttpObjectStore {
    async fn fetch(&self, location: &KnowledgeLocation) -> Result<KnowledgeDocument, FetchError> {
        let url = self.object_url(location)?;
        debug!("Fetching knowledge document {} from {}", location, url);

        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(location, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Object store returned {} for {}", status, location);
            return Err(match status {
                StatusCode::NOT_FOUND => FetchError::not_found(location),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    FetchError::access_denied(location, status)
                }
                other => FetchError::transport(location, format!("unexpected status {}", other)),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(location, e))?;

        decode_utf8(location, bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn location() -> KnowledgeLocation {
        KnowledgeLocation::new("kb-bucket", "redshift/rules.md")
    }

    #[tokio::test]
    async fn fetches_object_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/redshift/rules.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Rule 1: vacuum tables weekly."))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&server.uri()).unwrap();
        let doc = store.fetch(&location()).await.unwrap();

        assert_eq!(doc.content, "Rule 1: vacuum tables weekly.");
        assert_eq!(doc.location, location());
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/redshift/rules.md"))
            .and(header("Authorization", "Bearer s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&server.uri())
            .unwrap()
            .with_auth_token("s3cr3t".to_string());
        assert_eq!(store.fetch(&location()).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn classifies_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/missing.md"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/private.md"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/flaky.md"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kb-bucket/binary.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0xfd]))
            .mount(&server)
            .await;

        let store = HttpObjectStore::new(&server.uri()).unwrap();
        let store = &store;
        let fetch = move |key: &'static str| async move {
            store.fetch(&KnowledgeLocation::new("kb-bucket", key)).await
        };

        assert!(matches!(fetch("missing.md").await, Err(FetchError::NotFound { .. })));
        assert!(matches!(fetch("private.md").await, Err(FetchError::AccessDenied { .. })));
        assert!(matches!(fetch("flaky.md").await, Err(FetchError::Transport { .. })));
        assert!(matches!(fetch("binary.bin").await, Err(FetchError::Decode { .. })));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let store = HttpObjectStore::new("http://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        assert!(matches!(
            store.fetch(&location()).await,
            Err(FetchError::Transport { .. })
        ));
    }

    #[test]
    fn builds_path_style_urls() {
        let store = HttpObjectStore::new("https://s3.example.com/").unwrap();
        let url_for = |key: &str| {
            store
                .object_url(&KnowledgeLocation::new("kb", key))
                .map(|u| u.to_string())
        };

        assert_eq!(url_for("a b/rules.md").unwrap(), "https://s3.example.com/kb/a%20b/rules.md");
        assert_eq!(url_for("a//b.md").unwrap(), "https://s3.example.com/kb/a//b.md");
        assert_eq!(url_for("/lead.md").unwrap(), "https://s3.example.com/kb//lead.md");
        assert_eq!(url_for("notes/").unwrap(), "https://s3.example.com/kb/notes/");
        assert!(matches!(url_for("x/../secret.md"), Err(FetchError::AccessDenied { .. })));
        assert!(matches!(url_for("./rules.md"), Err(FetchError::AccessDenied { .. })));
    }

    #[test]
    fn keeps_endpoint_prefix() {
        let store = HttpObjectStore::new("https://gateway.example.com/objects").unwrap();
        let url = store
            .object_url(&KnowledgeLocation::new("kb", "redshift/rules.md"))
            .unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/objects/kb/redshift/rules.md");
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(HttpObjectStore::new("not a url").is_err());
    }
}
