//! New-entry detection between two polls of the same feed.
//!
//! Best-effort heuristic, not an exact dedup guarantee. An entry of the new
//! poll is considered already seen when its headline key appears in the
//! previous poll and the previous copy is at least as fresh. Freshness is
//! compared against the old entry at the same position and against the old
//! entry with the same key; either one being as fresh is enough. Feeds that
//! reorder entries and bump timestamps between polls can still cause repeats.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::types::{Entry, HeadlineKey, ParseResult, TIMEOUT_TITLE, UNAVAILABLE_TITLE};

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    startup_announces: bool,
}

impl ChangeDetector {
    /// `startup_announces` controls whether a feed's very first poll (no
    /// previous result) is announced.
    pub fn new(startup_announces: bool) -> Self {
        Self { startup_announces }
    }

    /// Entries of `new` worth announcing, in the order they appear in `new`.
    pub fn diff(&self, old: Option<&ParseResult>, new: &ParseResult) -> Vec<Entry> {
        if is_failure_placeholder(new) {
            tracing::debug!(title = %new.entries[0].title, "Poll failed, nothing to announce");
            return Vec::new();
        }

        let old_entries = old.map(|r| r.entries.as_slice()).unwrap_or_default();
        if old_entries.is_empty() && !self.startup_announces {
            return Vec::new();
        }

        // Freshest timestamp seen for every old key.
        let mut seen: HashMap<HeadlineKey, Option<DateTime<Utc>>> = HashMap::new();
        for entry in old_entries {
            let freshness = entry.freshness();
            seen.entry(entry.headline_key())
                .and_modify(|f| *f = (*f).max(freshness))
                .or_insert(freshness);
        }

        new.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.link.is_some())
            .filter(|(i, entry)| {
                let Some(&by_key) = seen.get(&entry.headline_key()) else {
                    return true;
                };
                let fresh = entry.freshness();
                let by_position = old_entries.get(*i).map(Entry::freshness);
                let already_seen = by_key >= fresh || by_position.is_some_and(|f| f >= fresh);
                !already_seen
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

/// A lone entry titled like a download failure means the whole poll failed.
fn is_failure_placeholder(result: &ParseResult) -> bool {
    match result.entries.as_slice() {
        [only] => only.title == TIMEOUT_TITLE || only.title == UNAVAILABLE_TITLE,
        _ => false,
    }
}
