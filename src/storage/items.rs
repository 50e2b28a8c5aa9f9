use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{ArchivedItem, DatabaseError};
use crate::feed::FeedItem;

impl Database {
    // ========================================================================
    // Item Archive Operations
    // ========================================================================

    /// Store items of a window, skipping fingerprints already archived for
    /// the feed. Returns the number of newly stored items.
    pub async fn archive_items(
        &self,
        feed_id: i64,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        const BATCH_SIZE: usize = 50;
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO items (feed_id, hash, title, link, published, fetched_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id)
                    .push_bind(&item.hash)
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(item.published)
                    .push_bind(now);
            });
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Archived items of a feed, newest first.
    pub async fn get_items_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<ArchivedItem>, DatabaseError> {
        let items = sqlx::query_as::<_, ArchivedItem>(
            r#"
            SELECT id, feed_id, hash, title, link, published, fetched_at
            FROM items
            WHERE feed_id = ?
            ORDER BY published DESC, fetched_at DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }
}
