use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{NewsflowError, Result};
use crate::domain::{CacheHeaders, Feed, FeedUpdate, Item};
use crate::store::{Store, UpsertStats};

const FEED_COLUMNS: &str = "id, url, title, description, last_updated, last_error, last_error_time,
     etag, last_modified, cache_control_max_age, visible, created_at";

const ITEM_COLUMNS: &str =
    "id, feed_id, guid, title, description, content, link, published, read, fetched_at";

/// SQLite-backed store. Every call goes through one connection mutex, so
/// reads and writes for all feeds are serialized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| NewsflowError::Migration(e.to_string()))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            NewsflowError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        Ok(row
            .get::<_, Option<String>>(idx)?
            .and_then(|s| Self::parse_datetime(&s)))
    }

    fn row_to_feed(row: &Row<'_>) -> rusqlite::Result<Feed> {
        Ok(Feed {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            last_updated: Self::optional_datetime(row, 4)?,
            last_error: row.get(5)?,
            last_error_time: Self::optional_datetime(row, 6)?,
            etag: row.get(7)?,
            last_modified: row.get(8)?,
            cache_control_max_age: row.get(9)?,
            visible: row.get(10)?,
            created_at: Self::optional_datetime(row, 11)?.unwrap_or_else(Utc::now),
        })
    }

    fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
        Ok(Item {
            id: row.get(0)?,
            feed_id: row.get(1)?,
            guid: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            content: row.get(5)?,
            link: row.get(6)?,
            published: Self::optional_datetime(row, 7)?,
            read: row.get(8)?,
            fetched_at: Self::optional_datetime(row, 9)?.unwrap_or_else(Utc::now),
        })
    }

    fn query_feeds(&self, sql: &str) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let feeds = stmt
            .query_map([], Self::row_to_feed)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }
}

fn apply_feed_update(conn: &Connection, id: i64, update: &FeedUpdate) -> Result<()> {
    let changed = conn.execute(
        "UPDATE feeds SET
            title = COALESCE(?1, title),
            description = COALESCE(?2, description),
            last_updated = COALESCE(?3, last_updated)
         WHERE id = ?4",
        params![
            update.title,
            update.description,
            update.last_updated.map(|dt| dt.to_rfc3339()),
            id
        ],
    )?;
    if changed == 0 {
        return Err(NewsflowError::FeedNotFound(id.to_string()));
    }

    if let Some(ref cache) = update.cache {
        write_cache_headers(conn, id, cache)?;
    }

    Ok(())
}

fn write_cache_headers(conn: &Connection, id: i64, cache: &CacheHeaders) -> Result<()> {
    conn.execute(
        "UPDATE feeds SET etag = ?1, last_modified = ?2, cache_control_max_age = ?3
         WHERE id = ?4",
        params![cache.etag, cache.last_modified, cache.max_age, id],
    )?;
    Ok(())
}

fn upsert_item_row(conn: &Connection, item: &Item) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM items WHERE feed_id = ?1 AND guid = ?2)",
        params![item.feed_id, item.guid],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO items (feed_id, guid, title, description, content, link, published, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(feed_id, guid) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            content = excluded.content,
            link = excluded.link,
            published = excluded.published",
        params![
            item.feed_id,
            item.guid,
            item.title,
            item.description,
            item.content,
            item.link,
            item.published.map(|dt| dt.to_rfc3339()),
            item.fetched_at.to_rfc3339()
        ],
    )?;

    Ok(!exists)
}

impl Store for SqliteStore {
    fn add_feed(&self, feed: &Feed) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO feeds (url, title, description, visible, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feed.url,
                feed.title,
                feed.description,
                feed.visible,
                feed.created_at.to_rfc3339()
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                params![id],
                Self::row_to_feed,
            )
            .optional()?;
        Ok(result)
    }

    fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"),
                params![url],
                Self::row_to_feed,
            )
            .optional()?;
        Ok(result)
    }

    fn list_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE visible = 1 ORDER BY title, url"
        ))
    }

    fn list_all_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY title, url"
        ))
    }

    fn set_feed_visible(&self, url: &str, visible: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE feeds SET visible = ?1 WHERE url = ?2",
            params![visible, url],
        )?;
        if changed == 0 {
            return Err(NewsflowError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<()> {
        let conn = self.conn()?;
        apply_feed_update(&conn, id, update)
    }

    fn update_feed_error(&self, id: i64, error: &str, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET last_error = ?1, last_error_time = ?2 WHERE id = ?3",
            params![error, when.to_rfc3339(), id],
        )?;
        Ok(())
    }

    fn clear_feed_error(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET last_error = NULL, last_error_time = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    fn mark_not_modified(&self, id: i64, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE feeds SET last_updated = ?1, last_error = NULL, last_error_time = NULL
             WHERE id = ?2",
            params![when.to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(NewsflowError::FeedNotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete_feed(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn upsert_item(&self, item: &Item) -> Result<bool> {
        let conn = self.conn()?;
        upsert_item_row(&conn, item)
    }

    fn commit_refresh(&self, id: i64, update: &FeedUpdate, items: &[Item]) -> Result<UpsertStats> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Title and description follow the latest document, even when it drops them.
        let changed = tx.execute(
            "UPDATE feeds SET
                title = ?1,
                description = ?2,
                last_updated = COALESCE(?3, last_updated),
                last_error = NULL,
                last_error_time = NULL
             WHERE id = ?4",
            params![
                update.title,
                update.description,
                update.last_updated.map(|dt| dt.to_rfc3339()),
                id
            ],
        )?;
        if changed == 0 {
            return Err(NewsflowError::FeedNotFound(id.to_string()));
        }
        if let Some(ref cache) = update.cache {
            write_cache_headers(&tx, id, cache)?;
        }

        let mut stats = UpsertStats::default();
        for item in items {
            debug_assert_eq!(item.feed_id, id);
            if upsert_item_row(&tx, item)? {
                stats.inserted += 1;
            } else {
                stats.updated += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    fn get_items_by_feed(&self, feed_id: i64) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ?1
             ORDER BY published DESC, id"
        ))?;
        let items = stmt
            .query_map(params![feed_id], Self::row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn get_all_items(&self) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY published DESC, id"
        ))?;
        let items = stmt
            .query_map([], Self::row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn set_read(&self, item_id: i64, read: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE items SET read = ?1 WHERE id = ?2",
            params![read, item_id],
        )?;
        Ok(())
    }

    fn mark_all_read(&self, feed_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE items SET read = 1 WHERE feed_id = ?1",
            params![feed_id],
        )?;
        Ok(())
    }

    fn get_unread_count(&self, feed_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE feed_id = ?1 AND read = 0",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
