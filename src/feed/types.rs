use chrono::{DateTime, Utc};

/// Title of the placeholder entry produced when a feed body cannot be parsed.
pub const UNPARSABLE_TITLE: &str = "Invalid (unparsable) RSS feed.";
/// Title of the placeholder entry produced when a download times out.
pub const TIMEOUT_TITLE: &str = "Timeout downloading feed.";
/// Title of the placeholder entry produced for any other download failure.
pub const UNAVAILABLE_TITLE: &str = "Unable to download feed.";

/// One syndicated item as returned by a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(title: impl Into<String>, link: Option<&str>) -> Self {
        Self {
            title: title.into(),
            link: link.map(String::from),
            published_at: None,
            updated_at: None,
        }
    }

    pub fn with_published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn with_updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Timestamp used for freshness comparison: `updated` wins over `published`.
    pub fn freshness(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.published_at)
    }

    /// Normalized (title tokens, link) pair used for equality-based deduplication.
    ///
    /// The title is lower-cased and split on whitespace so that differences in
    /// spacing or case between polls do not make an old headline look new.
    pub fn headline_key(&self) -> HeadlineKey {
        HeadlineKey {
            title_tokens: self
                .title
                .to_lowercase()
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            link: self.link.clone(),
        }
    }
}

/// Canonical headline key. Only ever compared, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeadlineKey {
    title_tokens: Vec<String>,
    link: Option<String>,
}

/// Why a [`ParseResult`] is a placeholder rather than real feed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFailure {
    Unparsable,
    Timeout,
    Unavailable,
}

impl FeedFailure {
    pub fn title(self) -> &'static str {
        match self {
            FeedFailure::Unparsable => UNPARSABLE_TITLE,
            FeedFailure::Timeout => TIMEOUT_TITLE,
            FeedFailure::Unavailable => UNAVAILABLE_TITLE,
        }
    }
}

/// Entries of one fetch, in the order the feed returned them.
///
/// Order is never re-sorted: newest-first is the usual source convention and
/// the change detector relies on positions being stable between polls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    pub entries: Vec<Entry>,
    /// `Some` when this result is a synthetic placeholder for a failed fetch.
    pub failure: Option<FeedFailure>,
}

impl ParseResult {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            failure: None,
        }
    }

    /// A result holding a single synthetic entry that describes `failure`.
    pub fn synthetic(failure: FeedFailure) -> Self {
        Self {
            entries: vec![Entry::new(failure.title(), None)],
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
