//! Hooks invoked by the poll task on each outcome.
//!
//! Callbacks run inline in the task. Any error they return is logged and
//! escalates the poll outcome to `Error`; it never aborts the cycle.

use anyhow::Result;
use async_trait::async_trait;

use super::transport::FetchResponse;
use crate::storage::{Database, Feed};

#[async_trait]
pub trait FeedActions: Send + Sync {
    /// A window was fetched and parsed; `feed.items` holds it.
    async fn on_modified(&self, feed: &Feed, response: &FetchResponse) -> Result<()>;

    /// Server answered 304.
    async fn on_unmodified(&self, feed: &Feed, response: &FetchResponse) -> Result<()>;

    /// Server answered with a status >= 400.
    async fn on_error(&self, feed: &Feed, response: &FetchResponse) -> Result<()>;

    /// Body could not be parsed.
    async fn on_exception(&self, feed: &Feed, response: &FetchResponse) -> Result<()>;
}

/// Logs every outcome and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActions;

#[async_trait]
impl FeedActions for LoggingActions {
    async fn on_modified(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        tracing::debug!(
            feed_id = feed.id,
            url = %feed.url,
            items = feed.items.len(),
            bytes = response.body.len(),
            "Feed modified"
        );
        Ok(())
    }

    async fn on_unmodified(&self, feed: &Feed, _response: &FetchResponse) -> Result<()> {
        tracing::debug!(feed_id = feed.id, url = %feed.url, "Feed not modified");
        Ok(())
    }

    async fn on_error(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            status = response.status,
            "Feed returned HTTP error"
        );
        Ok(())
    }

    async fn on_exception(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            content_type = response.content_type.as_deref().unwrap_or(""),
            "Feed body could not be parsed"
        );
        Ok(())
    }
}

/// Stores the items of every modified window in the `items` table.
#[derive(Clone)]
pub struct ArchiveActions {
    db: Database,
}

impl ArchiveActions {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FeedActions for ArchiveActions {
    async fn on_modified(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        LoggingActions.on_modified(feed, response).await?;
        let stored = self.db.archive_items(feed.id, &feed.items).await?;
        if stored > 0 {
            tracing::info!(feed_id = feed.id, stored = stored, "Archived new items");
        }
        Ok(())
    }

    async fn on_unmodified(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        LoggingActions.on_unmodified(feed, response).await
    }

    async fn on_error(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        LoggingActions.on_error(feed, response).await
    }

    async fn on_exception(&self, feed: &Feed, response: &FetchResponse) -> Result<()> {
        LoggingActions.on_exception(feed, response).await
    }
}
