//! Per-feed cache of item fingerprints seen in the most recent window.
//!
//! A feed window is not append-only: items can drop out, reorder or change
//! between polls. The cache is therefore never merged; each changed window
//! replaces it wholesale, which keeps it bounded to what the feed currently
//! shows.

use std::collections::{HashMap, HashSet};

use super::parser::FeedItem;

/// Items of `window` with duplicate fingerprints removed, first one kept.
pub fn distinct_items(window: &[FeedItem]) -> Vec<&FeedItem> {
    let mut seen = HashSet::new();
    window
        .iter()
        .filter(|item| seen.insert(item.hash.as_str()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemCache {
    /// fingerprint -> corrected publish timestamp (unix seconds)
    entries: HashMap<String, i64>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<i64> {
        self.entries.get(hash).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of items in `window` whose fingerprint is not cached.
    ///
    /// Must be called before [`ItemCache::replace`] for the same window.
    /// Duplicate fingerprints inside one window are counted once.
    pub fn count_new(&self, window: &[FeedItem]) -> usize {
        distinct_items(window)
            .into_iter()
            .filter(|item| !self.contains(&item.hash))
            .count()
    }

    /// Publish timestamp to trust for `item`: the source's own value, else
    /// the timestamp recorded when the item was first seen, else `poll_time`.
    pub fn corrected_timestamp(&self, item: &FeedItem, poll_time: i64) -> i64 {
        item.published
            .or_else(|| self.get(&item.hash))
            .unwrap_or(poll_time)
    }

    /// True when the cache already holds exactly the fingerprints of `window`.
    pub fn matches(&self, window: &[FeedItem]) -> bool {
        let hashes: HashSet<&str> =
            window.iter().map(|i| i.hash.as_str()).collect();
        hashes.len() == self.entries.len() && hashes.iter().all(|h| self.contains(h))
    }

    /// Drops every entry and stores the fingerprints of `window`.
    pub fn replace(&mut self, window: &[FeedItem], poll_time: i64) {
        let entries: HashMap<String, i64> = window
            .iter()
            .map(|item| (item.hash.clone(), self.corrected_timestamp(item, poll_time)))
            .collect();
        self.entries = entries;
    }
}
