use std::sync::Arc;
use std::time::Duration;

use super::cache::FeedCache;
use super::source::{FeedSource, FetchErrorKind};
use super::types::{FeedFailure, ParseResult};

/// Failed downloads count as if they happened this many poll intervals ago.
const FAILURE_PENALTY_FACTOR: f64 = 1.5;

/// Performs one fetch for a feed and applies the cache fallback policy.
///
/// Fetch errors never escape: the caller always gets a [`ParseResult`],
/// which is either fresh content, the previous good content, or a
/// single-entry synthetic placeholder describing the failure.
pub struct FeedFetcher {
    source: Arc<dyn FeedSource>,
    cache: Arc<FeedCache>,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(source: Arc<dyn FeedSource>, cache: Arc<FeedCache>, timeout: Duration) -> Self {
        Self {
            source,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    /// Fetches `url` on behalf of feed `name`, polled every `interval`.
    ///
    /// - success: the result becomes the cached baseline and is returned
    /// - timeout / unparsable: the previous good result is returned if there
    ///   is one, otherwise a synthetic placeholder; nothing is cached
    /// - any other error (including an empty feed): same fallback, and the
    ///   attempt timestamp is shifted back by 1.5 × `interval`
    pub async fn fetch(&self, name: &str, url: &str, interval: Duration) -> ParseResult {
        let err = match self.source.fetch_and_parse(url, self.timeout).await {
            Ok(result) if !result.is_empty() => {
                tracing::debug!(feed = %name, entries = result.entries.len(), "Fetched feed");
                self.cache.put(name, result.clone());
                return result;
            }
            Ok(_) => super::source::FetchError::Empty,
            Err(e) => e,
        };

        let kind = err.kind();
        let previous = self.cache.last_result(name);

        let (failure, penalty) = match kind {
            FetchErrorKind::Timeout => (FeedFailure::Timeout, Duration::ZERO),
            FetchErrorKind::Unparsable => (FeedFailure::Unparsable, Duration::ZERO),
            FetchErrorKind::Other => (
                FeedFailure::Unavailable,
                interval.mul_f64(FAILURE_PENALTY_FACTOR),
            ),
        };
        self.cache.mark_failed_attempt(name, penalty);

        match previous {
            Some(cached) => {
                tracing::warn!(
                    feed = %name,
                    url = %url,
                    error = %err,
                    "Fetch failed, using cached content"
                );
                cached
            }
            None => {
                tracing::warn!(
                    feed = %name,
                    url = %url,
                    error = %err,
                    "Fetch failed and nothing is cached"
                );
                ParseResult::synthetic(failure)
            }
        }
    }
}
