use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file user-only before SQLite touches it
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // connect_with reports the real error if this fails
            }
        }

        // Poll workers write concurrently; let SQLite wait for the lock
        // instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT,
                etag TEXT,
                last_modified INTEGER,
                checks INTEGER NOT NULL DEFAULT 0,
                unreachable_count INTEGER NOT NULL DEFAULT 0,
                unparsable_count INTEGER NOT NULL DEFAULT 0,
                misses INTEGER NOT NULL DEFAULT 0,
                last_miss INTEGER,
                check_interval INTEGER NOT NULL DEFAULT 60 CHECK (check_interval > 0),
                activity TEXT NOT NULL DEFAULT 'unknown',
                last_poll INTEGER,
                last_success INTEGER,
                window_size INTEGER NOT NULL DEFAULT 0,
                last_outcome TEXT NOT NULL DEFAULT 'open',
                blocked INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Fingerprints of the most recent window, replaced wholesale per poll
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_item_cache (
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                hash TEXT NOT NULL,
                published INTEGER NOT NULL,
                PRIMARY KEY (feed_id, hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                hash TEXT NOT NULL,
                title TEXT,
                link TEXT,
                published INTEGER,
                fetched_at INTEGER NOT NULL,
                UNIQUE(feed_id, hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Due-feed scan filters on blocked and orders by last_poll
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds(blocked, last_poll)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_feed_published ON items(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
