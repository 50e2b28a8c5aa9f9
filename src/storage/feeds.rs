use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedRow};
use crate::feed::ItemCache;

const FEED_COLUMNS: &str = "id, url, title, etag, last_modified, checks, unreachable_count, \
     unparsable_count, misses, last_miss, check_interval, activity, last_poll, last_success, \
     window_size, last_outcome, blocked";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed URL. Returns the existing id if already known.
    pub async fn insert_feed(&self, url: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO feeds (url) VALUES (?)
             ON CONFLICT(url) DO UPDATE SET url = excluded.url
             RETURNING id",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Subscribe to many URLs in one transaction. Returns how many were new.
    pub async fn insert_feeds(&self, urls: &[String]) -> Result<usize, DatabaseError> {
        if urls.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 100;
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in urls.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO feeds (url) ");
            builder.push_values(chunk, |mut b, url| {
                b.push_bind(url);
            });
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Load a feed together with its item cache.
    pub async fn load_feed(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or(DatabaseError::FeedNotFound(feed_id))?;

        let entries: Vec<(String, i64)> =
            sqlx::query_as("SELECT hash, published FROM feed_item_cache WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;

        row.into_feed(ItemCache::from_entries(entries))
    }

    /// All feeds ordered by id, without item caches.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| row.into_feed(ItemCache::new()))
            .collect()
    }

    /// Ids of non-blocked feeds that were never polled or whose interval
    /// has elapsed at `now` (unix seconds). Never-polled feeds come first.
    pub async fn due_feed_ids(&self, now: i64) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM feeds
            WHERE blocked = 0
              AND (last_poll IS NULL OR last_poll + check_interval * 60 <= ?)
            ORDER BY last_poll IS NOT NULL, last_poll, id
        "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Write back a polled feed.
    ///
    /// With `replace_item_cache`, every cached fingerprint of the feed is
    /// deleted and the feed's current cache inserted, in the same
    /// transaction as the feed row.
    pub async fn upsert_feed(
        &self,
        feed: &Feed,
        replace_item_cache: bool,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feeds (
                id, url, title, etag, last_modified, checks, unreachable_count,
                unparsable_count, misses, last_miss, check_interval, activity,
                last_poll, last_success, window_size, last_outcome, blocked
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                checks = excluded.checks,
                unreachable_count = excluded.unreachable_count,
                unparsable_count = excluded.unparsable_count,
                misses = excluded.misses,
                last_miss = excluded.last_miss,
                check_interval = excluded.check_interval,
                activity = excluded.activity,
                last_poll = excluded.last_poll,
                last_success = excluded.last_success,
                window_size = excluded.window_size,
                last_outcome = excluded.last_outcome
        "#,
        )
        .bind(feed.id)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.etag)
        .bind(feed.last_modified)
        .bind(feed.checks)
        .bind(feed.unreachable_count)
        .bind(feed.unparsable_count)
        .bind(feed.misses)
        .bind(feed.last_miss)
        .bind(feed.check_interval.max(1))
        .bind(feed.activity.as_str())
        .bind(feed.last_poll)
        .bind(feed.last_success)
        .bind(feed.window_size)
        .bind(feed.last_outcome.as_str())
        .bind(feed.blocked)
        .execute(&mut *tx)
        .await?;

        if replace_item_cache {
            sqlx::query("DELETE FROM feed_item_cache WHERE feed_id = ?")
                .bind(feed.id)
                .execute(&mut *tx)
                .await?;

            const BATCH_SIZE: usize = 100;
            let entries: Vec<(&str, i64)> = feed.item_cache.iter().collect();
            for chunk in entries.chunks(BATCH_SIZE) {
                let mut builder: QueryBuilder<sqlx::Sqlite> =
                    QueryBuilder::new("INSERT INTO feed_item_cache (feed_id, hash, published) ");
                builder.push_values(chunk, |mut b, (hash, published)| {
                    b.push_bind(feed.id).push_bind(*hash).push_bind(*published);
                });
                builder.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Include or exclude a feed from scheduling.
    pub async fn set_feed_blocked(&self, feed_id: i64, blocked: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET blocked = ? WHERE id = ?")
            .bind(blocked)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    /// Clear the unreachable/unparsable counters of a feed.
    pub async fn reset_feed_counters(&self, feed_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE feeds SET unreachable_count = 0, unparsable_count = 0 WHERE id = ?",
        )
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::feed::{FeedItem, PollOutcome};
    use crate::schedule::ActivityPattern;
    use crate::storage::{Database, DatabaseError};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn item(n: u32) -> FeedItem {
        FeedItem::new(
            Some(n.to_string()),
            Some(format!("https://example.com/{n}")),
            Some(format!("Item {n}")),
            Some(1_700_000_000 + n as i64),
        )
    }

    #[tokio::test]
    async fn test_insert_feed_is_idempotent() {
        let db = test_db().await;
        let a = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let b = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(db.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_feeds_batch_counts_new() {
        let db = test_db().await;
        let urls: Vec<String> = (0..250)
            .map(|i| format!("https://feed{i}.example.com/rss"))
            .collect();
        assert_eq!(db.insert_feeds(&urls).await.unwrap(), 250);
        assert_eq!(db.insert_feeds(&urls[..10]).await.unwrap(), 0);
        assert_eq!(db.list_feeds().await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn test_new_feed_defaults() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let feed = db.load_feed(id).await.unwrap();
        assert_eq!(feed.last_outcome, PollOutcome::Open);
        assert_eq!(feed.activity, ActivityPattern::Unknown);
        assert_eq!(feed.check_interval, 60);
        assert!(feed.item_cache.is_empty());
        assert!(!feed.blocked);
    }

    #[tokio::test]
    async fn test_load_missing_feed() {
        let db = test_db().await;
        assert!(matches!(
            db.load_feed(42).await,
            Err(DatabaseError::FeedNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_upsert_round_trips_state() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();

        let mut feed = db.load_feed(id).await.unwrap();
        feed.etag = Some("\"v1\"".into());
        feed.last_modified = Some(1_700_000_000);
        feed.checks = 3;
        feed.unreachable_count = 1;
        feed.misses = 2;
        feed.check_interval = 15;
        feed.activity = ActivityPattern::Constant;
        feed.last_outcome = PollOutcome::Miss;
        feed.last_poll = Some(1_700_000_100);
        db.upsert_feed(&feed, false).await.unwrap();

        let loaded = db.load_feed(id).await.unwrap();
        assert_eq!(loaded, feed);
    }

    #[tokio::test]
    async fn test_upsert_replaces_item_cache_wholesale() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let mut feed = db.load_feed(id).await.unwrap();

        let w1: Vec<FeedItem> = (1..=3).map(item).collect();
        feed.item_cache.replace(&w1, 1);
        db.upsert_feed(&feed, true).await.unwrap();
        assert_eq!(db.load_feed(id).await.unwrap().item_cache.len(), 3);

        let w2: Vec<FeedItem> = (3..=4).map(item).collect();
        feed.item_cache.replace(&w2, 2);
        db.upsert_feed(&feed, true).await.unwrap();

        let loaded = db.load_feed(id).await.unwrap();
        assert_eq!(loaded.item_cache, feed.item_cache);
        assert!(!loaded.item_cache.contains(&item(1).hash));
    }

    #[tokio::test]
    async fn test_upsert_without_replace_keeps_cache() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let mut feed = db.load_feed(id).await.unwrap();
        feed.item_cache.replace(&[item(1)], 1);
        db.upsert_feed(&feed, true).await.unwrap();

        feed.item_cache.replace(&[], 2);
        db.upsert_feed(&feed, false).await.unwrap();
        assert_eq!(db.load_feed(id).await.unwrap().item_cache.len(), 1);
    }

    #[tokio::test]
    async fn test_due_feed_ids() {
        let db = test_db().await;
        let never = db.insert_feed("https://a.example.com/rss").await.unwrap();
        let due = db.insert_feed("https://b.example.com/rss").await.unwrap();
        let later = db.insert_feed("https://c.example.com/rss").await.unwrap();
        let blocked = db.insert_feed("https://d.example.com/rss").await.unwrap();

        let now = 1_000_000;
        let mut f = db.load_feed(due).await.unwrap();
        f.last_poll = Some(now - 3600);
        f.check_interval = 30;
        db.upsert_feed(&f, false).await.unwrap();

        let mut f = db.load_feed(later).await.unwrap();
        f.last_poll = Some(now - 60);
        f.check_interval = 30;
        db.upsert_feed(&f, false).await.unwrap();

        db.set_feed_blocked(blocked, true).await.unwrap();

        assert_eq!(db.due_feed_ids(now).await.unwrap(), vec![never, due]);
    }

    #[tokio::test]
    async fn test_upsert_does_not_clear_external_block() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let feed = db.load_feed(id).await.unwrap();
        db.set_feed_blocked(id, true).await.unwrap();

        // Working copy was loaded before the block
        db.upsert_feed(&feed, false).await.unwrap();
        assert!(db.load_feed(id).await.unwrap().blocked);
    }

    #[tokio::test]
    async fn test_reset_counters() {
        let db = test_db().await;
        let id = db.insert_feed("https://example.com/feed.xml").await.unwrap();
        let mut feed = db.load_feed(id).await.unwrap();
        feed.unreachable_count = 4;
        feed.unparsable_count = 2;
        db.upsert_feed(&feed, false).await.unwrap();

        db.reset_feed_counters(id).await.unwrap();
        let loaded = db.load_feed(id).await.unwrap();
        assert_eq!(loaded.unreachable_count, 0);
        assert_eq!(loaded.unparsable_count, 0);
        assert!(matches!(
            db.reset_feed_counters(999).await,
            Err(DatabaseError::FeedNotFound(999))
        ));
    }
}
