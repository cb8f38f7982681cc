use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{NewsflowError, Result};
use crate::domain::Item;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parses an RSS/Atom/JSON Feed document into feed metadata and items in
    /// document order.
    pub fn normalize(&self, feed_id: i64, body: &[u8]) -> Result<(FeedMeta, Vec<Item>)> {
        // Leave source-less ids empty so entry_to_item can key them on the link.
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(body)
            .map_err(|e| NewsflowError::FeedParse(e.to_string()))?;

        let meta = FeedMeta {
            title: feed.title.map(|t| decode(&t.content)).filter(|t| !t.is_empty()),
            description: feed
                .description
                .map(|d| decode(&d.content))
                .filter(|d| !d.is_empty()),
        };

        let items = feed
            .entries
            .into_iter()
            .map(|entry| Self::entry_to_item(feed_id, entry))
            .collect();

        Ok((meta, items))
    }

    fn entry_to_item(feed_id: i64, entry: Entry) -> Item {
        let title = entry.title.as_ref().map(|t| decode(&t.content));
        let link = entry.links.first().map(|l| l.href.clone());
        let published = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        let guid = if !entry.id.is_empty() {
            entry.id.clone()
        } else if let Some(ref link) = link {
            link.clone()
        } else {
            Item::synthesize_guid(title.as_deref(), published)
        };

        let mut description = entry
            .summary
            .as_ref()
            .map(|s| decode(&s.content))
            .unwrap_or_default();
        let mut content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .map(decode)
            .unwrap_or_default();

        if content.is_empty() {
            content = description.clone();
        }

        // YouTube and similar dialects only ship media:group/media:description
        if content.is_empty() && description.is_empty() {
            if let Some(media_description) = media_description(&entry) {
                content = media_description.clone();
                description = media_description;
            }
        }

        let mut item = Item::new(feed_id, guid);
        item.title = title;
        item.link = link;
        item.description = Some(description).filter(|d| !d.is_empty());
        item.content = Some(content).filter(|c| !c.is_empty());
        item.published = published;
        item
    }
}

fn decode(s: &str) -> String {
    decode_html_entities(s).to_string()
}

fn media_description(entry: &Entry) -> Option<String> {
    entry
        .media
        .iter()
        .filter_map(|m| m.description.as_ref())
        .map(|d| decode(&d.content))
        .find(|d| !d.is_empty())
}
