use thiserror::Error;

use crate::feed::{FeedItem, ItemCache, PollOutcome};
use crate::schedule::ActivityPattern;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another feedhound process appears to be using the database. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Requested feed does not exist
    #[error("Feed {0} not found")]
    FeedNotFound(i64),

    /// A stored value could not be decoded
    #[error("Corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Raw `feeds` row, decoded into [`Feed`] by [`FeedRow::into_feed`]
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<i64>,
    pub checks: i64,
    pub unreachable_count: i64,
    pub unparsable_count: i64,
    pub misses: i64,
    pub last_miss: Option<i64>,
    pub check_interval: i64,
    pub activity: String,
    pub last_poll: Option<i64>,
    pub last_success: Option<i64>,
    pub window_size: i64,
    pub last_outcome: String,
    pub blocked: bool,
}

impl FeedRow {
    pub(crate) fn into_feed(self, item_cache: ItemCache) -> Result<Feed, DatabaseError> {
        let activity = self
            .activity
            .parse::<ActivityPattern>()
            .map_err(|_| DatabaseError::Corrupt {
                column: "activity",
                value: self.activity.clone(),
            })?;
        let last_outcome =
            self.last_outcome
                .parse::<PollOutcome>()
                .map_err(|_| DatabaseError::Corrupt {
                    column: "last_outcome",
                    value: self.last_outcome.clone(),
                })?;

        Ok(Feed {
            id: self.id,
            url: self.url,
            title: self.title,
            etag: self.etag,
            last_modified: self.last_modified,
            checks: self.checks,
            unreachable_count: self.unreachable_count,
            unparsable_count: self.unparsable_count,
            misses: self.misses,
            last_miss: self.last_miss,
            check_interval: self.check_interval.max(1),
            activity,
            last_poll: self.last_poll,
            last_success: self.last_success,
            window_size: self.window_size,
            last_outcome,
            blocked: self.blocked,
            items: Vec::new(),
            item_cache,
        })
    }
}

/// Item row kept by the archive action
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchivedItem {
    pub id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<i64>,
    pub fetched_at: i64,
}

// ============================================================================
// Data Structures
// ============================================================================

/// One subscribed source and its polling state.
///
/// The poll task works on an owned copy and hands it back to the store for
/// an upsert, so no two cycles share a mutable `Feed`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    /// Entity tag from the last response that carried a body
    pub etag: Option<String>,
    /// Last-Modified from the last response that carried a body (unix seconds)
    pub last_modified: Option<i64>,
    pub checks: i64,
    /// Only grows, except through [`crate::storage::Database::reset_feed_counters`]
    pub unreachable_count: i64,
    /// Only grows, except through [`crate::storage::Database::reset_feed_counters`]
    pub unparsable_count: i64,
    pub misses: i64,
    pub last_miss: Option<i64>,
    /// Predicted minutes until the next poll, always >= 1
    pub check_interval: i64,
    pub activity: ActivityPattern,
    pub last_poll: Option<i64>,
    pub last_success: Option<i64>,
    pub window_size: i64,
    pub last_outcome: PollOutcome,
    /// Set by an operator, excludes the feed from scheduling
    pub blocked: bool,
    /// Window of the current poll; emptied before the task returns
    pub items: Vec<FeedItem>,
    pub item_cache: ItemCache,
}

impl Feed {
    pub const DEFAULT_CHECK_INTERVAL: i64 = 60;

    /// Fresh, never-polled feed.
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: None,
            etag: None,
            last_modified: None,
            checks: 0,
            unreachable_count: 0,
            unparsable_count: 0,
            misses: 0,
            last_miss: None,
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            activity: ActivityPattern::Unknown,
            last_poll: None,
            last_success: None,
            window_size: 0,
            last_outcome: PollOutcome::Open,
            blocked: false,
            items: Vec::new(),
            item_cache: ItemCache::new(),
        }
    }

    pub fn has_validator(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Unix time at which the feed is next due.
    pub fn next_check(&self) -> Option<i64> {
        self.last_poll.map(|t| t + self.check_interval * 60)
    }
}
