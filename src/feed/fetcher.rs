use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Browser-like identification; the release feed rejects unidentified clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_1) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.0.2171.95 Safari/537.36";

/// Errors that can occur while retrieving a feed document.
///
/// Every variant means the document for the term could not be obtained;
/// no retry happens at this layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request and body read exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Retrieves raw feed documents for search terms from a fixed endpoint.
///
/// Each fetch issues `GET <endpoint>?rss=1&search=<term>`. The client is
/// cheap to clone and pooled, so one fetcher serves a whole process.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl FeedFetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built
    /// (for example when the TLS backend fails to initialize).
    pub fn new(endpoint: Url, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, endpoint, timeout))
    }

    /// Use a caller-configured client (tests, shared pools).
    pub fn with_client(client: reqwest::Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    /// URL requested for `term`, with the term form-encoded.
    pub fn url_for(&self, term: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("rss", "1")
            .append_pair("search", term);
        url
    }

    /// Fetch the raw feed document for `term`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection, TLS or body stream errors
    /// - [`FetchError::Timeout`] - Request plus body read exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded 10MB
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    pub async fn fetch(&self, term: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(term);
        tracing::debug!(term = %term, url = %url, "Fetching feed");

        let bytes = tokio::time::timeout(self.timeout, self.fetch_url(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        tracing::debug!(term = %term, bytes = bytes.len(), "Feed fetched");
        Ok(bytes)
    }

    async fn fetch_url(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: A dropped connection mid-body yields fewer bytes than announced
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Game1</title><link>http://a</link></item>
</channel></rss>"#;

    fn fetcher_for(server: &MockServer, timeout: Duration) -> FeedFetcher {
        let endpoint = Url::parse(&format!("{}/", server.uri())).unwrap();
        FeedFetcher::new(endpoint, DEFAULT_USER_AGENT, timeout).unwrap()
    }

    #[test]
    fn test_url_encodes_term() {
        let endpoint = Url::parse("https://predb.me/").unwrap();
        let fetcher =
            FeedFetcher::with_client(reqwest::Client::new(), endpoint, Duration::from_secs(1));

        assert_eq!(
            fetcher.url_for("NSW-BigBlueBox").as_str(),
            "https://predb.me/?rss=1&search=NSW-BigBlueBox"
        );
        assert_eq!(
            fetcher.url_for("a b&c").as_str(),
            "https://predb.me/?rss=1&search=a+b%26c"
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_query_and_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("rss", "1"))
            .and(query_param("search", "NSW-HR"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = fetcher_for(&server, Duration::from_secs(5))
            .fetch("NSW-HR")
            .await
            .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());

        let requests = server.received_requests().await.unwrap();
        let agent = requests[0].headers.get("user-agent").unwrap();
        assert_eq!(agent.to_str().unwrap(), DEFAULT_USER_AGENT);
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = fetcher_for(&server, Duration::from_secs(5)).fetch("x").await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetcher_for(&server, Duration::from_secs(5)).fetch("x").await;
        assert!(matches!(result, Err(FetchError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = fetcher_for(&server, Duration::from_millis(200))
            .fetch("x")
            .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let endpoint = Url::parse("http://127.0.0.1:1/").unwrap();
        let fetcher =
            FeedFetcher::new(endpoint, DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();

        let result = fetcher.fetch("x").await;
        assert!(matches!(result, Err(FetchError::Network(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .mount(&server)
            .await;

        let result = fetcher_for(&server, Duration::from_secs(10)).fetch("x").await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }
}
