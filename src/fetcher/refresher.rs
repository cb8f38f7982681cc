use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::app::{NewsflowError, Result};
use crate::domain::{CacheHeaders, FeedUpdate};
use crate::fetcher::{FetchResult, Fetcher};
use crate::normalizer::Normalizer;
use crate::store::{Store, UpsertStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Still within the origin's `max-age`; no request was sent.
    Fresh,
    /// The origin answered 304.
    NotModified,
    /// A new document was parsed and written.
    Updated(UpsertStats),
}

/// Runs the single-feed refresh: cache short-circuit, conditional GET,
/// error bookkeeping and item upserts.
///
/// Cache validators from a 200 response are committed only after the body
/// parses, in the same store transaction as the items, so a corrupt body
/// never leaves the feed pointing at a document that was not ingested.
pub struct FeedRefresher<S: Store> {
    store: Arc<S>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    normalizer: Normalizer,
    span: Span,
}

impl<S: Store + Send + Sync> FeedRefresher<S> {
    pub fn new(store: Arc<S>, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self {
            store,
            fetcher,
            normalizer: Normalizer::new(),
            span: info_span!("feeds"),
        }
    }

    /// Parent span for every refresh this instance logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn refresh_feed(&self, feed_id: i64) -> Result<RefreshOutcome> {
        self.refresh_feed_at(feed_id, Utc::now()).await
    }

    pub async fn refresh_feed_by_url(&self, url: &str) -> Result<RefreshOutcome> {
        let feed = self
            .store
            .get_feed_by_url(url)?
            .ok_or_else(|| NewsflowError::FeedNotFound(url.to_string()))?;
        self.refresh_feed(feed.id).await
    }

    /// Refreshes as if the current time were `now`.
    pub async fn refresh_feed_at(&self, feed_id: i64, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let span = info_span!(parent: &self.span, "refresh", feed_id);
        self.refresh_inner(feed_id, now).instrument(span).await
    }

    async fn refresh_inner(&self, feed_id: i64, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let feed = self
            .store
            .get_feed(feed_id)?
            .ok_or_else(|| NewsflowError::FeedNotFound(feed_id.to_string()))?;

        if feed.is_fresh_at(now) {
            debug!(
                url = %feed.url,
                expires_at = ?feed.cache_expires_at(),
                "Feed within cache-control max-age, skipping fetch"
            );
            return Ok(RefreshOutcome::Fresh);
        }

        let result = match self
            .fetcher
            .fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(url = %feed.url, error = %e, "Error fetching feed");
                self.record_error(feed_id, &e, now);
                return Err(e);
            }
        };

        match result {
            FetchResult::NotModified => {
                debug!(url = %feed.url, "Feed not modified");
                self.store.mark_not_modified(feed_id, now)?;
                Ok(RefreshOutcome::NotModified)
            }
            FetchResult::Content {
                body,
                etag,
                last_modified,
                max_age,
            } => {
                let (meta, items) = match self.normalizer.normalize(feed_id, &body) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        error!(url = %feed.url, error = %e, "Error parsing feed");
                        self.record_error(feed_id, &e, now);
                        return Err(e);
                    }
                };

                let update = FeedUpdate {
                    title: meta.title,
                    description: meta.description,
                    last_updated: Some(now),
                    cache: Some(CacheHeaders {
                        etag,
                        last_modified,
                        max_age,
                    }),
                };

                let stats = self.store.commit_refresh(feed_id, &update, &items)?;
                info!(
                    url = %feed.url,
                    new = stats.inserted,
                    updated = stats.updated,
                    "Feed refreshed"
                );
                Ok(RefreshOutcome::Updated(stats))
            }
        }
    }

    fn record_error(&self, feed_id: i64, err: &NewsflowError, when: DateTime<Utc>) {
        if let Err(store_err) = self.store.update_feed_error(feed_id, &err.to_string(), when) {
            warn!(feed_id, error = %store_err, "Failed to record feed error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::domain::Feed;
    use crate::store::SqliteStore;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Scripted</title>
<item><guid>a</guid><title>A</title><description>first</description></item>
</channel></rss>"#;

    /// Replays canned results and records the validators it was called with.
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<FetchResult>>>,
        calls: AtomicUsize,
        seen_etags: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedFetcher {
        fn new(mut responses: Vec<Result<FetchResult>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                seen_etags: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _url: &str,
            etag: Option<&str>,
            _last_modified: Option<&str>,
        ) -> Result<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_etags.lock().unwrap().push(etag.map(String::from));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(NewsflowError::Other("no scripted response".into())))
        }
    }

    fn content(body: &str, etag: Option<&str>, max_age: Option<i64>) -> Result<FetchResult> {
        Ok(FetchResult::Content {
            body: body.as_bytes().to_vec(),
            etag: etag.map(String::from),
            last_modified: None,
            max_age,
        })
    }

    fn setup(fetcher: Arc<ScriptedFetcher>) -> (FeedRefresher<SqliteStore>, i64) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = store
            .add_feed(&Feed::new("https://example.com/feed.xml".into()))
            .unwrap();
        (FeedRefresher::new(store, fetcher), id)
    }

    #[tokio::test]
    async fn test_cache_short_circuit_skips_fetch() {
        let fetcher = ScriptedFetcher::new(vec![content(RSS, None, Some(3600))]);
        let (refresher, id) = setup(fetcher.clone());
        let t0 = Utc::now();

        refresher.refresh_feed_at(id, t0).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let outcome = refresher
            .refresh_feed_at(id, t0 + Duration::seconds(1800))
            .await
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Fresh);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_fetches_with_validators() {
        let fetcher = ScriptedFetcher::new(vec![
            content(RSS, Some("\"v1\""), Some(60)),
            Ok(FetchResult::NotModified),
        ]);
        let (refresher, id) = setup(fetcher.clone());
        let t0 = Utc::now();

        refresher.refresh_feed_at(id, t0).await.unwrap();
        let outcome = refresher
            .refresh_feed_at(id, t0 + Duration::seconds(61))
            .await
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::NotModified);
        let seen = fetcher.seen_etags.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("\"v1\"".to_string())]);
    }

    #[tokio::test]
    async fn test_status_error_recorded_without_touching_cache_fields() {
        let fetcher = ScriptedFetcher::new(vec![
            content(RSS, Some("\"v1\""), None),
            Err(NewsflowError::HttpStatus {
                status: 500,
                reason: "Internal Server Error".into(),
            }),
        ]);
        let (refresher, id) = setup(fetcher);

        refresher.refresh_feed(id).await.unwrap();
        let err = refresher.refresh_feed(id).await.unwrap_err();
        assert!(matches!(err, NewsflowError::HttpStatus { status: 500, .. }));

        let feed = refresher.store().get_feed(id).unwrap().unwrap();
        assert!(feed.last_error.unwrap().contains("500"));
        assert!(feed.last_error_time.is_some());
        assert_eq!(feed.etag, Some("\"v1\"".into()));
        assert_eq!(feed.title, Some("Scripted".into()));
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_advance_validators() {
        let fetcher = ScriptedFetcher::new(vec![
            content(RSS, Some("\"v1\""), None),
            content("this is not xml", Some("\"v2\""), Some(600)),
        ]);
        let (refresher, id) = setup(fetcher);

        refresher.refresh_feed(id).await.unwrap();
        let before = refresher.store().get_feed(id).unwrap().unwrap();

        let err = refresher.refresh_feed(id).await.unwrap_err();
        assert!(matches!(err, NewsflowError::FeedParse(_)));

        let after = refresher.store().get_feed(id).unwrap().unwrap();
        assert_eq!(after.etag, Some("\"v1\"".into()));
        assert_eq!(after.cache_control_max_age, None);
        assert_eq!(after.last_updated, before.last_updated);
        assert!(after.last_error.is_some());
    }

    #[tokio::test]
    async fn test_guidless_item_edited_upstream_updates_in_place() {
        let guidless = |title: &str| {
            format!(
                r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Scripted</title><item><title>{title}</title><link>https://example.com/post-1</link></item></channel></rss>"#
            )
        };
        let fetcher = ScriptedFetcher::new(vec![
            content(&guidless("Typo"), None, None),
            content(&guidless("Fixed"), None, None),
        ]);
        let (refresher, id) = setup(fetcher);

        refresher.refresh_feed(id).await.unwrap();
        let outcome = refresher.refresh_feed(id).await.unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome::Updated(UpsertStats {
                inserted: 0,
                updated: 1
            })
        );
        let items = refresher.store().get_items_by_feed(id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Fixed"));
    }

    #[tokio::test]
    async fn test_missing_feed() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let (refresher, _) = setup(fetcher.clone());

        let err = refresher.refresh_feed(999).await.unwrap_err();
        assert!(matches!(err, NewsflowError::FeedNotFound(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_by_url() {
        let fetcher = ScriptedFetcher::new(vec![content(RSS, None, None)]);
        let (refresher, id) = setup(fetcher);

        let outcome = refresher
            .refresh_feed_by_url("https://example.com/feed.xml")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Updated(UpsertStats {
                inserted: 1,
                updated: 0
            })
        );
        assert_eq!(refresher.store().get_items_by_feed(id).unwrap().len(), 1);
    }
}
