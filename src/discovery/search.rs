use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Search API returned status {0}")]
    HttpStatus(u16),
    #[error("Search response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed search response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid search endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Insecure search endpoint: HTTPS required (except localhost for testing)")]
    InsecureEndpoint,
}

/// Web search used to seed the discovery crawler with candidate pages.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Returns up to `count` result page URLs for `query`.
    async fn search(
        &self,
        query: &str,
        count: usize,
        language: &str,
    ) -> Result<Vec<String>, SearchError>;
}

/// Provider that never returns anything; used when only seed URLs are given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _: &str, _: usize, _: &str) -> Result<Vec<String>, SearchError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "webPages")]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    url: String,
}

/// Bing Web Search v7 client.
pub struct BingSearch {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for BingSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingSearch")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl BingSearch {
    /// Creates a client for `endpoint`.
    ///
    /// The endpoint must be HTTPS so the subscription key is never sent in
    /// clear text. Plain HTTP is accepted for localhost only.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        api_key: SecretString,
    ) -> Result<Self, SearchError> {
        let parsed =
            Url::parse(endpoint).map_err(|e| SearchError::InvalidEndpoint(e.to_string()))?;

        if parsed.scheme() != "https" {
            let is_localhost = parsed.scheme() == "http"
                && matches!(parsed.host_str(), Some("127.0.0.1") | Some("localhost"));
            if !is_localhost {
                tracing::error!(endpoint = %endpoint, "Rejecting non-HTTPS search endpoint");
                return Err(SearchError::InsecureEndpoint);
            }
            tracing::warn!(endpoint = %endpoint, "Using non-HTTPS search endpoint (localhost only)");
        }

        Ok(Self {
            client,
            endpoint: parsed,
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for BingSearch {
    async fn search(
        &self,
        query: &str,
        count: usize,
        language: &str,
    ) -> Result<Vec<String>, SearchError> {
        let count = count.to_string();
        let url = Url::parse_with_params(
            self.endpoint.as_str(),
            &[
                ("q", query),
                ("count", count.as_str()),
                ("setLang", language),
                ("responseFilter", "Webpages"),
            ],
        )
        .map_err(|e| SearchError::InvalidEndpoint(e.to_string()))?;

        let request = self
            .client
            .get(url)
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret());

        let response = tokio::time::timeout(SEARCH_TIMEOUT, request.send())
            .await
            .map_err(|_| SearchError::Timeout)??;

        if !response.status().is_success() {
            return Err(SearchError::HttpStatus(response.status().as_u16()));
        }

        // Fast path: check Content-Length header
        if response
            .content_length()
            .is_some_and(|len| len > MAX_RESPONSE_SIZE as u64)
        {
            return Err(SearchError::ResponseTooLarge(MAX_RESPONSE_SIZE));
        }

        let body = tokio::time::timeout(
            SEARCH_TIMEOUT,
            read_limited_body(response.bytes_stream(), MAX_RESPONSE_SIZE),
        )
        .await
        .map_err(|_| SearchError::Timeout)??;

        let parsed: SearchResponse = serde_json::from_slice(&body)?;
        let urls: Vec<String> = parsed
            .web_pages
            .map(|pages| pages.value.into_iter().map(|p| p.url).collect())
            .unwrap_or_default();

        tracing::debug!(query = %query, results = urls.len(), "Search completed");
        Ok(urls)
    }
}

/// Collects a chunked body, failing as soon as it grows past `limit`.
async fn read_limited_body<S, B, E>(mut stream: S, limit: usize) -> Result<Vec<u8>, SearchError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<SearchError>,
{
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let chunk = chunk.as_ref();
        if body.len().saturating_add(chunk.len()) > limit {
            return Err(SearchError::ResponseTooLarge(limit));
        }
        body.extend_from_slice(chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> BingSearch {
        BingSearch::new(
            reqwest::Client::new(),
            &format!("{}/v7.0/search", server.uri()),
            SecretString::from("test-key"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_returns_result_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7.0/search"))
            .and(query_param("q", "rust blog"))
            .and(query_param("count", "2"))
            .and(query_param("setLang", "en"))
            .and(header("Ocp-Apim-Subscription-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webPages": { "value": [
                    { "name": "A", "url": "https://a.example.com/" },
                    { "name": "B", "url": "https://b.example.com/post" }
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let urls = provider(&server).search("rust blog", 2, "en").await.unwrap();
        assert_eq!(
            urls,
            vec!["https://a.example.com/", "https://b.example.com/post"]
        );
    }

    #[tokio::test]
    async fn test_search_without_web_pages_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let urls = provider(&server).search("nothing", 10, "en").await.unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn test_search_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = provider(&server).search("q", 10, "en").await;
        assert!(matches!(result, Err(SearchError::HttpStatus(401))));
    }

    #[tokio::test]
    async fn test_search_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = provider(&server).search("q", 10, "en").await;
        assert!(matches!(result, Err(SearchError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_search_rejects_oversized_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(vec![b' '; MAX_RESPONSE_SIZE + 1]),
            )
            .mount(&server)
            .await;

        let result = provider(&server).search("q", 10, "en").await;
        assert!(matches!(result, Err(SearchError::ResponseTooLarge(_))));
    }

    #[tokio::test]
    async fn test_chunked_body_stops_at_limit() {
        // No Content-Length: the limit must apply while streaming
        let chunks = futures::stream::iter(
            std::iter::repeat_with(|| Ok::<_, SearchError>(vec![b'x'; 1024])).take(10),
        );
        let result = read_limited_body(chunks, 4096).await;
        assert!(matches!(result, Err(SearchError::ResponseTooLarge(4096))));
    }

    #[tokio::test]
    async fn test_chunked_body_within_limit() {
        let chunks = futures::stream::iter([
            Ok::<_, SearchError>(&b"{\"webPages\":"[..]),
            Ok(&b"null}"[..]),
        ]);
        let body = read_limited_body(chunks, 4096).await.unwrap();
        assert_eq!(body, b"{\"webPages\":null}".to_vec());
    }

    #[tokio::test]
    async fn test_chunked_body_propagates_stream_error() {
        let chunks = futures::stream::iter([
            Ok(vec![b'x'; 10]),
            Err(SearchError::Timeout),
        ]);
        let result = read_limited_body(chunks, 4096).await;
        assert!(matches!(result, Err(SearchError::Timeout)));
    }

    #[test]
    fn test_rejects_insecure_endpoint() {
        let result = BingSearch::new(
            reqwest::Client::new(),
            "http://search.example.com/v7.0/search",
            SecretString::from("k"),
        );
        assert!(matches!(result, Err(SearchError::InsecureEndpoint)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let search = BingSearch::new(
            reqwest::Client::new(),
            DEFAULT_SEARCH_ENDPOINT,
            SecretString::from("super-secret"),
        )
        .unwrap();
        let debug = format!("{search:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_no_search_is_empty() {
        assert!(NoSearch.search("q", 10, "en").await.unwrap().is_empty());
    }
}
