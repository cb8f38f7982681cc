use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::{NewsflowError, Result};
use crate::fetcher::FeedRefresher;
use crate::store::Store;
use crate::tasks::{Task, TaskHandler, TaskType};

pub const FEED_ID_KEY: &str = "feed_id";
pub const URL_KEY: &str = "url";

/// Builds a refresh task for one feed. `url` rides along for logging.
pub fn create_feed_refresh_task(feed_id: i64, url: &str) -> Task {
    Task::new(TaskType::FeedRefresh)
        .with_data(FEED_ID_KEY, feed_id)
        .with_data(URL_KEY, url)
}

/// Reads the feed id from a task or event payload. Integers, whole floats
/// and numeric strings are accepted.
pub fn feed_id_of(data: &HashMap<String, Value>) -> Option<i64> {
    match data.get(FEED_ID_KEY)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Runs [`FeedRefresher::refresh_feed`] for `feed_refresh` tasks.
pub struct FeedRefreshHandler<S: Store> {
    refresher: Arc<FeedRefresher<S>>,
}

impl<S: Store> FeedRefreshHandler<S> {
    pub fn new(refresher: Arc<FeedRefresher<S>>) -> Self {
        Self { refresher }
    }
}

#[async_trait]
impl<S: Store + Send + Sync + 'static> TaskHandler for FeedRefreshHandler<S> {
    fn task_type(&self) -> TaskType {
        TaskType::FeedRefresh
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> Result<()> {
        let feed_id = feed_id_of(&task.data).ok_or_else(|| {
            NewsflowError::Other(format!("task {} has no valid feed_id", task.id))
        })?;

        let outcome = self.refresher.refresh_feed(feed_id).await?;
        debug!(task_id = %task.id, feed_id, ?outcome, "Feed refresh task finished");
        Ok(())
    }
}
