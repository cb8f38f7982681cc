use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, StatusCode};

use crate::app::{NewsflowError, Result};
use crate::fetcher::cache::parse_max_age;
use crate::fetcher::token::FeedTokens;
use crate::fetcher::{FetchResult, Fetcher};

/// Per-request timeout for feed fetches.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// `Newsflow <version>; +<homepage>`
pub fn user_agent() -> String {
    format!(
        "Newsflow {}; +{}",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_HOMEPAGE")
    )
}

pub struct HttpFetcher {
    client: Client,
    tokens: FeedTokens,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(FEED_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            client,
            tokens: FeedTokens::default(),
        })
    }

    /// Private-feed tokens appended to matching GitHub/GitLab requests.
    pub fn with_tokens(mut self, tokens: FeedTokens) -> Self {
        self.tokens = tokens;
        self
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult> {
        let mut headers = HeaderMap::new();

        if let Some(etag) = etag.filter(|v| !v.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        if let Some(last_modified) = last_modified.filter(|v| !v.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let tokenized = self.tokens.request_url(url);
        let response = self
            .client
            .get(tokenized.as_deref().unwrap_or(url))
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                // the error text would include the tokenized URL
                if tokenized.is_some() {
                    NewsflowError::from_transport(e.without_url())
                } else {
                    NewsflowError::from_transport(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResult::NotModified);
        }

        if !status.is_success() {
            return Err(NewsflowError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
            });
        }

        let etag = header_string(response.headers(), ETAG);
        let last_modified = header_string(response.headers(), LAST_MODIFIED);
        let max_age = header_string(response.headers(), CACHE_CONTROL)
            .as_deref()
            .and_then(parse_max_age);

        let body = response
            .bytes()
            .await
            .map_err(|e| NewsflowError::from_transport(e.without_url()))?
            .to_vec();

        Ok(FetchResult::Content {
            body,
            etag,
            last_modified,
            max_age,
        })
    }
}
