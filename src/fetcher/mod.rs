pub mod cache;
pub mod http_fetcher;
pub mod refresher;
pub mod token;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;
pub use refresher::{FeedRefresher, RefreshOutcome};
pub use token::FeedTokens;

#[derive(Debug)]
pub enum FetchResult {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
        /// `max-age` from `Cache-Control`, in seconds
        max_age: Option<i64>,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

/// One conditional GET against a feed origin.
///
/// Errors distinguish transport failures (`Http`, `Timeout`) from
/// unexpected statuses (`HttpStatus`).
#[async_trait]
pub trait Fetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult>;
}
