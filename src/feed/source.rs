use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::parse_feed;
use super::types::ParseResult;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const USER_AGENT: &str = concat!("feedie/", env!("CARGO_PKG_VERSION"), " (IRC feed announcer)");

/// Errors a single fetch-and-parse can end with.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Download exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Unparsable feed: {0}")]
    Unparsable(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Feed parsed but carried no entries
    #[error("Feed is empty")]
    Empty,
}

/// Coarse classification the fetcher's fallback policy switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    Unparsable,
    Other,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout => FetchErrorKind::Timeout,
            FetchError::Network(e) if e.is_timeout() => FetchErrorKind::Timeout,
            FetchError::Unparsable(_) => FetchErrorKind::Unparsable,
            FetchError::Network(_)
            | FetchError::HttpStatus(_)
            | FetchError::ResponseTooLarge
            | FetchError::Empty => FetchErrorKind::Other,
        }
    }
}

/// Something that can download and parse a feed.
///
/// The production implementation is [`HttpFeedSource`]; tests plug in
/// scripted sources.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_and_parse(&self, url: &str, timeout: Duration)
        -> Result<ParseResult, FetchError>;
}

/// Fetches feeds over HTTP(S) and parses them with `feed-rs`.
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Uses a caller-configured client, e.g. one behind a proxy.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_and_parse(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<ParseResult, FetchError> {
        // The whole download, body included, shares one deadline.
        let bytes = tokio::time::timeout(timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let result = parse_feed(&bytes).map_err(|e| FetchError::Unparsable(e.to_string()))?;
        if result.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(result)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn source() -> HttpFeedSource {
        HttpFeedSource::new().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let result = source()
            .fetch_and_parse(&url, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].title, "Test");
    }

    #[tokio::test]
    async fn test_with_client_uses_given_client() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "custom-agent/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::builder()
            .user_agent("custom-agent/1.0")
            .build()
            .unwrap();
        let url = format!("{}/feed", mock_server.uri());
        let result = HttpFeedSource::with_client(client)
            .fetch_and_parse(&url, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_404_is_other() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = source()
            .fetch_and_parse(&url, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
        assert_eq!(err.kind(), FetchErrorKind::Other);
    }

    #[tokio::test]
    async fn test_malformed_body_is_unparsable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = source()
            .fetch_and_parse(&url, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Unparsable);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = source()
            .fetch_and_parse(&url, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_feed_without_entries_is_empty() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Nothing</title></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = source()
            .fetch_and_parse(&url, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Empty));
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = source()
            .fetch_and_parse(&url, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }
}
