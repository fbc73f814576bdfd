//! Durable content store used for full-history uploads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::Response;
use tracing::debug;

use crate::error::StoreError;
use crate::transport::default_user_agent;

/// Default content store endpoint.
pub const DEFAULT_CONTENT_URL: &str = "https://bytebin.tickscope.dev";

/// Default viewer prefix; the content key is appended.
pub const DEFAULT_VIEWER_URL: &str = "https://tickscope.dev/";

const MODIFICATION_KEY: &str = "Modification-Key";
const ALLOW_MODIFICATION: &str = "Allow-Modification";

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Public key the document is served under.
    pub key: String,
    /// Secret needed to overwrite the document, when the store hands one out.
    pub modification_key: Option<String>,
}

/// Somewhere to put gzip-compressed documents and overwrite them later.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a new document. `bytes` are already gzip-compressed.
    async fn create(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<Content, StoreError>;

    /// Overwrite an existing document in place, keeping its key.
    async fn update(
        &self,
        content: &Content,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Where a person can look at the document.
    fn viewer_url(&self, key: &str) -> String {
        key.to_string()
    }
}

/// HTTP client for a bytebin-style store.
#[derive(Debug, Clone)]
pub struct BytebinClient {
    base_url: String,
    viewer_url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl BytebinClient {
    pub fn builder() -> BytebinClientBuilder {
        BytebinClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(StoreError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl ContentStore for BytebinClient {
    async fn create(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<Content, StoreError> {
        let size = bytes.len();
        let response = self
            .client
            .post(format!("{}/post", self.base_url))
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_ENCODING, "gzip")
            .header(USER_AGENT, &self.user_agent)
            .header(ALLOW_MODIFICATION, "true")
            .body(bytes)
            .send()
            .await?;
        let response = Self::check(response)?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim_start_matches('/').to_string())
                .filter(|s| !s.is_empty())
        };
        let location = header(LOCATION.as_str());
        let modification_key = header(MODIFICATION_KEY);

        let key = match location {
            Some(key) => key,
            None => {
                let body = response.bytes().await?;
                let body: serde_json::Value =
                    serde_json::from_slice(&body).map_err(|_| StoreError::MissingKey)?;
                body.get("key")
                    .and_then(|k| k.as_str())
                    .map(str::to_string)
                    .ok_or(StoreError::MissingKey)?
            }
        };

        debug!(key = %key, size, public, "Content created");
        Ok(Content {
            key,
            modification_key,
        })
    }

    async fn update(
        &self,
        content: &Content,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let size = bytes.len();
        let mut request = self
            .client
            .put(format!("{}/{}", self.base_url, content.key))
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_ENCODING, "gzip")
            .header(USER_AGENT, &self.user_agent);
        if let Some(modification_key) = &content.modification_key {
            request = request.header(MODIFICATION_KEY, modification_key);
        }

        let response = request.body(bytes).send().await?;
        Self::check(response)?;

        debug!(key = %content.key, size, "Content updated");
        Ok(())
    }

    fn viewer_url(&self, key: &str) -> String {
        format!("{}{}", self.viewer_url, key)
    }
}

/// Builder for [`BytebinClient`].
#[derive(Debug, Clone)]
pub struct BytebinClientBuilder {
    base_url: String,
    viewer_url: String,
    user_agent: String,
    timeout: Duration,
}

impl BytebinClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_CONTENT_URL.to_string(),
            viewer_url: DEFAULT_VIEWER_URL.to_string(),
            user_agent: default_user_agent(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn viewer_url(mut self, url: impl Into<String>) -> Self {
        self.viewer_url = url.into();
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BytebinClient, StoreError> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(BytebinClient {
            base_url: self.base_url,
            viewer_url: self.viewer_url,
            user_agent: self.user_agent,
            client,
        })
    }
}

impl Default for BytebinClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
