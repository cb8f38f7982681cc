//! Foreground daemon that refreshes every feed on a fixed interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::{AppContext, Result};
use crate::config::{format_interval, ConfigError, RefreshConfig, MAX_INTERVAL_SECS};
use crate::orchestrator::{BatchSummary, RefreshOrchestrator};
use crate::store::SqliteStore;
use crate::tasks::TaskEvent;

/// Extra grace on top of the HTTP timeout when draining workers at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval: Duration,
    /// Whether to run an update immediately on start
    pub update_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            update_on_start: true,
        }
    }
}

impl DaemonConfig {
    pub fn from_refresh(refresh: &RefreshConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            interval: refresh.interval()?,
            update_on_start: refresh.on_startup,
        })
    }
}

pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self { ctx, config }
    }

    /// Runs until SIGINT/SIGTERM.
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `shutdown` resolves. A batch in progress is abandoned;
    /// refreshes already executing are given time to finish.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) -> Result<()> {
        if self.config.interval.is_zero() || self.config.interval.as_secs() > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "daemon interval must be between 1s and {}",
                format_interval(MAX_INTERVAL_SECS)
            ))
            .into());
        }
        self.ctx.start()?;
        let mut events = self.ctx.scheduler.subscribe();
        let mut orchestrator = self.ctx.orchestrator();

        info!(
            interval = %format_interval(self.config.interval.as_secs()),
            workers = self.ctx.scheduler.workers(),
            concurrency = orchestrator.max_concurrency(),
            "Newsflow daemon started"
        );

        let first = if self.config.update_on_start {
            Instant::now()
        } else {
            Instant::now() + self.config.interval
        };
        let mut timer = interval_at(first, self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = timer.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = run_update(&mut orchestrator, &mut events) => {}
                    }
                }
            }
        }

        info!("Daemon shutting down...");
        let grace = self.ctx.config.http.timeout() + SHUTDOWN_GRACE;
        if !self.ctx.shutdown(grace).await? {
            warn!(grace_secs = grace.as_secs(), "Refreshes still running at exit");
        }
        Ok(())
    }
}

/// Runs a single update cycle over every visible feed.
pub async fn run_update(
    orchestrator: &mut RefreshOrchestrator<SqliteStore>,
    events: &mut mpsc::Receiver<TaskEvent>,
) -> BatchSummary {
    let start = Instant::now();

    match orchestrator.refresh_all() {
        Ok(0) if orchestrator.is_idle() => {
            info!("No feeds to update");
            return BatchSummary::default();
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Failed to list feeds");
            return BatchSummary::default();
        }
    }

    let summary = orchestrator.run_until_idle(events).await;
    info!(
        completed = summary.completed,
        failed = summary.failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Update complete"
    );
    summary
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = tokio::signal::ctrl_c() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::NewsflowError;
    use crate::config::Config;

    #[test]
    fn test_config_from_refresh_section() {
        let mut refresh = RefreshConfig::default();
        refresh.interval = "30m".into();
        refresh.on_startup = false;

        let config = DaemonConfig::from_refresh(&refresh).unwrap();
        assert_eq!(config.interval, Duration::from_secs(1800));
        assert!(!config.update_on_start);

        refresh.interval = "never".into();
        assert!(DaemonConfig::from_refresh(&refresh).is_err());
    }

    #[tokio::test]
    async fn test_daemon_stops_on_shutdown_future() {
        let ctx = Arc::new(AppContext::in_memory(Config::default()).unwrap());
        let daemon = Daemon::new(ctx.clone(), DaemonConfig::default());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            daemon.run_until(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .expect("daemon did not stop");

        assert!(result.is_ok());
        assert!(!ctx.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_out_of_range_interval_rejected_before_start() {
        let ctx = Arc::new(AppContext::in_memory(Config::default()).unwrap());
        let daemon = Daemon::new(
            ctx.clone(),
            DaemonConfig {
                interval: Duration::from_secs(u64::MAX),
                update_on_start: false,
            },
        );

        let result = daemon.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(NewsflowError::Config(_))));
        assert!(!ctx.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_empty_update_cycle() {
        let ctx = AppContext::in_memory(Config::default()).unwrap();
        ctx.start().unwrap();
        let mut events = ctx.scheduler.subscribe();
        let mut orchestrator = ctx.orchestrator();

        let summary = run_update(&mut orchestrator, &mut events).await;
        assert_eq!(summary, BatchSummary::default());
    }
}
