//! In-memory store of the last good parse of every feed.
//!
//! Nothing here survives a restart. Entries are only removed by [`FeedCache::clear`],
//! which the service calls when the configuration is reloaded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::types::ParseResult;

/// Cached state of one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub feed_name: String,
    /// Last successful, non-empty parse. Failures never overwrite it.
    pub last_result: Option<ParseResult>,
    /// Time of the last attempt, successful or not. May be shifted into the
    /// past by a failure penalty.
    pub last_attempt_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<CacheEntry>>;

/// Thread-safe feed cache with one lock per feed.
///
/// The outer map lock is held only long enough to find or create a feed's
/// slot; reads and writes for different feeds never contend on the same
/// entry lock.
#[derive(Debug, Default)]
pub struct FeedCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a feed's cache entry.
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        let entry = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(entry)
    }

    /// Last good parse result for a feed, if any.
    pub fn last_result(&self, name: &str) -> Option<ParseResult> {
        self.get(name).and_then(|e| e.last_result)
    }

    /// Records a successful fetch: stores `result` as the new baseline and
    /// stamps the attempt with the current time.
    pub fn put(&self, name: &str, result: ParseResult) {
        let now = Utc::now();
        self.with_slot(name, now, |entry| {
            entry.last_result = Some(result);
            entry.last_attempt_at = now;
        });
    }

    /// Records a failed fetch. Only `last_attempt_at` changes; it is set to
    /// `now - penalty` so that the attempt counts as having happened earlier.
    pub fn mark_failed_attempt(&self, name: &str, penalty: Duration) {
        let now = Utc::now();
        let shifted = chrono::Duration::from_std(penalty)
            .ok()
            .and_then(|p| now.checked_sub_signed(p))
            .unwrap_or(now);
        self.with_slot(name, shifted, |entry| {
            entry.last_attempt_at = shifted;
        });
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_slot(&self, name: &str, initial_attempt: DateTime<Utc>, f: impl FnOnce(&mut CacheEntry)) {
        let existing = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        let slot = match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(CacheEntry {
                        feed_name: name.to_string(),
                        last_result: None,
                        last_attempt_at: initial_attempt,
                    }))
                })
                .clone(),
        };

        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entry);
    }
}
