pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{Feed, FeedUpdate, Item};

pub use sqlite::SqliteStore;

/// Outcome of writing one parsed document into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Feed store used by the refresh engine.
///
/// Implementations serialize access however they like; the refresh path
/// assumes each call is atomic on its own and that `commit_refresh` is
/// atomic as a whole.
pub trait Store {
    // Feed operations
    fn add_feed(&self, feed: &Feed) -> Result<i64>;
    fn get_feed(&self, id: i64) -> Result<Option<Feed>>;
    fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>>;
    /// Visible feeds only.
    fn list_feeds(&self) -> Result<Vec<Feed>>;
    fn list_all_feeds(&self) -> Result<Vec<Feed>>;
    fn set_feed_visible(&self, url: &str, visible: bool) -> Result<()>;
    fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<()>;
    fn update_feed_error(&self, id: i64, error: &str, when: DateTime<Utc>) -> Result<()>;
    fn clear_feed_error(&self, id: i64) -> Result<()>;
    /// Records a 304: clears the error and bumps `last_updated`, nothing else.
    fn mark_not_modified(&self, id: i64, when: DateTime<Utc>) -> Result<()>;
    fn delete_feed(&self, id: i64) -> Result<()>;

    // Item operations
    /// Returns `true` when a new row was created.
    fn upsert_item(&self, item: &Item) -> Result<bool>;
    /// Clears the feed error, writes `update` and upserts `items` in one
    /// transaction. Unlike `update_feed`, a `None` title or description
    /// overwrites the stored value.
    fn commit_refresh(&self, id: i64, update: &FeedUpdate, items: &[Item]) -> Result<UpsertStats>;
    fn get_items_by_feed(&self, feed_id: i64) -> Result<Vec<Item>>;
    fn get_all_items(&self) -> Result<Vec<Item>>;

    // Read status
    fn set_read(&self, item_id: i64, read: bool) -> Result<()>;
    fn mark_all_read(&self, feed_id: i64) -> Result<()>;
    fn get_unread_count(&self, feed_id: i64) -> Result<i64>;
}
