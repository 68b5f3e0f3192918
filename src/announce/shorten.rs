use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("feedie/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("Shortener request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Shortener returned status {0}")]
    HttpStatus(u16),
    #[error("Shortener returned an empty body")]
    EmptyResponse,
    #[error("Unknown shorten service: {0}")]
    UnknownService(String),
}

/// Turns a long link into a short one.
#[async_trait]
pub trait UrlShortener: Send + Sync {
    async fn shorten(&self, url: &str) -> Result<String, ShortenError>;
}

/// Supported public shortening services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortenService {
    VGd,
    TinyUrl,
}

impl ShortenService {
    pub fn from_name(name: &str) -> Result<Self, ShortenError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "v.gd" => Ok(Self::VGd),
            "tinyurl.com" | "tinyurl" => Ok(Self::TinyUrl),
            _ => Err(ShortenError::UnknownService(name.to_string())),
        }
    }

    /// Request URL prefix; the encoded `url=` parameter is appended to it.
    fn endpoint(self) -> &'static str {
        match self {
            Self::VGd => "https://v.gd/create.php?format=simple&",
            Self::TinyUrl => "http://tinyurl.com/api-create.php?",
        }
    }
}

/// Shortener backed by a "plain text API" service: `GET <endpoint>url=<link>`
/// answers with the short link as the whole body.
pub struct ServiceShortener {
    client: reqwest::Client,
    endpoint: String,
}

impl ServiceShortener {
    pub fn new(service: ShortenService) -> Result<Self, ShortenError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_endpoint(client, service.endpoint()))
    }

    /// `endpoint` must end in `?` or `&`.
    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl UrlShortener for ServiceShortener {
    async fn shorten(&self, url: &str) -> Result<String, ShortenError> {
        let request_url = format!("{}url={}", self.endpoint, urlencoding::encode(url));
        let response = self.client.get(&request_url).send().await?;

        if !response.status().is_success() {
            return Err(ShortenError::HttpStatus(response.status().as_u16()));
        }

        let body = response.text().await?;
        let short = body.trim();
        if short.is_empty() {
            return Err(ShortenError::EmptyResponse);
        }
        Ok(short.to_string())
    }
}

/// Passes links through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShortener;

#[async_trait]
impl UrlShortener for NoShortener {
    async fn shorten(&self, url: &str) -> Result<String, ShortenError> {
        Ok(url.to_string())
    }
}

/// Shortens `url`, falling back to `url` itself on any error.
pub async fn shorten_or_original(shortener: &dyn UrlShortener, url: &str) -> String {
    match shortener.shorten(url).await {
        Ok(short) => short,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Could not shorten link, using it as is");
            url.to_string()
        }
    }
}
