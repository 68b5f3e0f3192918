//! Feed retrieval and new-entry detection.
//!
//! - [`source`] - the `FeedSource` capability and its HTTP implementation
//! - [`parser`] - RSS/Atom/JSON Feed parsing using the `feed-rs` crate
//! - [`cache`] - last good parse of every feed
//! - [`fetcher`] - one fetch with cached fallback and failure penalty
//! - [`diff`] - which entries of a poll are new
//!
//! # Example
//!
//! ```ignore
//! let fetcher = FeedFetcher::new(source, cache.clone(), Duration::from_secs(30));
//! let old = cache.last_result("rust-blog");
//! let new = fetcher.fetch("rust-blog", url, interval).await;
//! for entry in ChangeDetector::new(false).diff(old.as_ref(), &new) {
//!     // announce
//! }
//! ```

pub mod cache;
pub mod diff;
pub mod fetcher;
pub mod parser;
pub mod source;
mod types;

pub use cache::{CacheEntry, FeedCache};
pub use diff::ChangeDetector;
pub use fetcher::FeedFetcher;
pub use parser::parse_feed;
pub use source::{FeedSource, FetchError, FetchErrorKind, HttpFeedSource};
pub use types::{
    Entry, FeedFailure, HeadlineKey, ParseResult, TIMEOUT_TITLE, UNAVAILABLE_TITLE,
    UNPARSABLE_TITLE,
};
