use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    /// Source-provided identifier; `(feed_id, guid)` is the upsert key.
    pub guid: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub read: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Item {
    pub fn new(feed_id: i64, guid: impl Into<String>) -> Self {
        Self {
            id: 0,
            feed_id,
            guid: guid.into(),
            title: None,
            description: None,
            content: None,
            link: None,
            published: None,
            read: false,
            fetched_at: Utc::now(),
        }
    }

    /// Deterministic stand-in GUID for entries that carry neither an id nor a link.
    pub fn synthesize_guid(title: Option<&str>, published: Option<DateTime<Utc>>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.unwrap_or_default().as_bytes());
        if let Some(published) = published {
            hasher.update(published.to_rfc3339().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}
