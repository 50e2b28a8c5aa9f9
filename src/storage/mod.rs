mod feeds;
mod items;
mod schema;
mod types;

use async_trait::async_trait;

pub use schema::Database;
pub use types::{ArchivedItem, DatabaseError, Feed};

/// Durable home of feeds, as seen by the poll task.
///
/// The task loads a working copy at the start of a cycle and hands it back
/// at the end; the store applies the write atomically.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn load_feed(&self, feed_id: i64) -> Result<Feed, DatabaseError>;

    async fn upsert_feed(&self, feed: &Feed, replace_item_cache: bool)
        -> Result<(), DatabaseError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn load_feed(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        Database::load_feed(self, feed_id).await
    }

    async fn upsert_feed(
        &self,
        feed: &Feed,
        replace_item_cache: bool,
    ) -> Result<(), DatabaseError> {
        Database::upsert_feed(self, feed, replace_item_cache).await
    }
}
