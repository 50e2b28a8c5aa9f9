use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::request::{parse_http_date, FetchRequest};

const MAX_RETRIES: u32 = 3;

/// Transport-level failures: the request produced no usable HTTP response.
///
/// HTTP error statuses are not errors here; they come back as a
/// [`FetchResponse`] and are classified by the caller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Request could not be built (bad URL or header value)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Raw result of a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub etag: Option<String>,
    /// `Last-Modified` in unix seconds
    pub last_modified: Option<i64>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn is_http_error(&self) -> bool {
        self.status >= 400
    }
}

/// Network seam shared by the poll task and the discovery crawler.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Limits applied by [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: concat!("feedhound/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// reqwest-backed transport with timeout and streaming size limit.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    settings: TransportSettings,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Wrap an existing client (tests, shared connection pools).
    pub fn with_client(client: reqwest::Client, settings: TransportSettings) -> Self {
        Self { client, settings }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        if let Some(etag) = &request.if_none_match {
            builder = builder.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(since) = &request.if_modified_since {
            builder = builder.header(reqwest::header::IF_MODIFIED_SINCE, since);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else {
                TransportError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let etag = header(reqwest::header::ETAG);
        let last_modified = header(reqwest::header::LAST_MODIFIED)
            .as_deref()
            .and_then(parse_http_date);
        let content_type = header(reqwest::header::CONTENT_TYPE);

        // 304 and error responses carry nothing worth reading
        let body = if status == 304 || status >= 400 {
            Vec::new()
        } else {
            read_limited_bytes(response, self.settings.max_body_size).await?
        };

        Ok(FetchResponse {
            status,
            final_url,
            etag,
            last_modified,
            content_type,
            body,
        })
    }

    async fn fetch_with_retries(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResponse, TransportError> {
        let mut retry_count = 0;
        loop {
            match self.fetch_once(request).await {
                Err(TransportError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    let delay = Duration::from_millis(500 * 2u64.pow(retry_count));
                    tracing::debug!(
                        url = %request.url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// One deadline covers the whole fetch, retries included.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        tokio::time::timeout(self.settings.timeout, self.fetch_with_retries(request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
