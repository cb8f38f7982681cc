use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info_span;

use crate::app::error::Result;
use crate::config::Config;
use crate::fetcher::{FeedRefresher, FeedTokens, Fetcher, HttpFetcher};
use crate::orchestrator::RefreshOrchestrator;
use crate::store::sqlite::SqliteStore;
use crate::tasks::{FeedRefreshHandler, HandlerRegistry, Scheduler};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub refresher: Arc<FeedRefresher<SqliteStore>>,
    pub scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.storage.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteStore::new(&db_path)?);
        let fetcher = Arc::new(http_fetcher(&config)?);
        Self::with_parts(config, store, fetcher)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let fetcher = Arc::new(http_fetcher(&config)?);
        Self::with_parts(config, store, fetcher)
    }

    /// Wires the refresh pipeline around an existing store and fetcher.
    pub fn with_parts(
        config: Config,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Result<Self> {
        let refresher = Arc::new(
            FeedRefresher::new(store.clone(), fetcher.clone()).with_span(info_span!("refresh")),
        );
        let registry =
            HandlerRegistry::new().with(Arc::new(FeedRefreshHandler::new(refresher.clone())))?;
        let scheduler = Arc::new(
            Scheduler::with_registry(config.refresh.workers(), registry)
                .with_span(info_span!("scheduler")),
        );

        Ok(Self {
            config,
            store,
            fetcher,
            refresher,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the scheduler workers.
    pub fn start(&self) -> Result<()> {
        self.scheduler.start(&self.cancel)?;
        Ok(())
    }

    /// A fresh orchestrator sized from `[refresh] concurrency`.
    pub fn orchestrator(&self) -> RefreshOrchestrator<SqliteStore> {
        RefreshOrchestrator::new(
            self.scheduler.clone(),
            self.store.clone(),
            self.config.refresh.concurrency,
        )
        .with_span(info_span!("orchestrator"))
    }

    /// Stops the scheduler and waits up to `timeout` for in-flight
    /// refreshes. Returns `false` if they were still running.
    pub async fn shutdown(&self, timeout: Duration) -> Result<bool> {
        let mut handle = self.scheduler.stop()?;
        Ok(handle.wait_timeout(timeout).await)
    }
}

fn http_fetcher(config: &Config) -> Result<HttpFetcher> {
    let tokens = FeedTokens::from_env().with_gitlab_hosts(config.http.gitlab_hosts.iter().cloned());
    Ok(HttpFetcher::with_timeout(config.http.timeout())?.with_tokens(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn test_context_wires_refresh_handler() {
        let ctx = AppContext::in_memory(Config::default()).unwrap();
        assert_eq!(ctx.scheduler.workers(), 4);
        assert_eq!(ctx.orchestrator().max_concurrency(), 4);

        ctx.start().unwrap();
        assert!(ctx.scheduler.is_running());
        // the handler is bound, so registering another one must fail
        assert!(ctx
            .scheduler
            .register_handler(Arc::new(FeedRefreshHandler::new(ctx.refresher.clone())))
            .is_err());
        assert!(ctx.shutdown(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_context_opens_on_disk_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.database = Some(dir.path().join("nested").join("feeds.db"));

        let ctx = AppContext::new(config).unwrap();
        assert!(dir.path().join("nested").join("feeds.db").exists());
        assert!(ctx.store.get_feed(1).unwrap().is_none());
    }
}
