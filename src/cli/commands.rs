use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::app::{AppContext, NewsflowError, Result};
use crate::config::parse_interval;
use crate::daemon::{Daemon, DaemonConfig};
use crate::domain::Feed;
use crate::fetcher::RefreshOutcome;
use crate::store::Store;

/// How long `refresh` waits for in-flight fetches after the batch.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(NewsflowError::Other(format!(
            "Unsupported URL scheme '{}': only http and https feeds are supported",
            other
        ))),
    }
}

pub async fn add_feed(ctx: &AppContext, url: &str) -> Result<()> {
    validate_url(url)?;

    if let Some(existing) = ctx.store.get_feed_by_url(url)? {
        if existing.visible {
            println!("Feed already exists: {}", url);
        } else {
            ctx.store.set_feed_visible(url, true)?;
            println!("Restored feed: {}", url);
        }
        return Ok(());
    }

    let feed_id = ctx.store.add_feed(&Feed::new(url.to_string()))?;
    println!("Added feed: {}", url);

    // A failed first fetch keeps the feed; the error is recorded on it.
    match ctx.refresher.refresh_feed(feed_id).await {
        Ok(RefreshOutcome::Updated(stats)) => {
            if let Some(feed) = ctx.store.get_feed(feed_id)? {
                if let Some(title) = feed.title {
                    println!("Feed title: {}", title);
                }
            }
            println!("Fetched {} items", stats.inserted);
        }
        Ok(_) => println!("Feed not modified"),
        Err(e) => eprintln!("Initial fetch failed: {}", e),
    }

    Ok(())
}

pub fn remove_feed(ctx: &AppContext, url: &str, purge: bool) -> Result<()> {
    let feed = ctx
        .store
        .get_feed_by_url(url)?
        .ok_or_else(|| NewsflowError::FeedNotFound(url.to_string()))?;

    if purge {
        ctx.store.delete_feed(feed.id)?;
        println!("Deleted feed: {}", url);
    } else {
        ctx.store.set_feed_visible(url, false)?;
        println!("Removed feed: {}", url);
    }
    Ok(())
}

/// Refreshes one feed or every visible feed through the scheduler.
pub async fn refresh(ctx: &AppContext, feed_id: Option<i64>) -> Result<()> {
    ctx.start()?;
    let mut events = ctx.scheduler.subscribe();
    let mut orchestrator = ctx.orchestrator();

    let feed_ids = match feed_id {
        Some(id) => {
            orchestrator.refresh_feed(id)?;
            vec![id]
        }
        None => {
            let feeds = ctx.store.list_feeds()?;
            if feeds.is_empty() {
                println!("No feeds to update");
                ctx.shutdown(DRAIN_TIMEOUT).await?;
                return Ok(());
            }
            println!("Updating {} feeds...", feeds.len());
            orchestrator.refresh_all()?;
            feeds.iter().map(|f| f.id).collect()
        }
    };

    let summary = orchestrator.run_until_idle(&mut events).await;
    ctx.shutdown(DRAIN_TIMEOUT).await?;

    for id in feed_ids {
        if let Some(feed) = ctx.store.get_feed(id)? {
            if let Some(err) = feed.last_error.as_deref() {
                eprintln!("  Error updating {}: {}", feed.display_title(), err);
            }
        }
    }

    println!(
        "Update complete: {} refreshed, {} errors",
        summary.completed, summary.failed
    );
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.list_feeds()?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for feed in feeds {
        let unread = ctx.store.get_unread_count(feed.id)?;
        let marker = feed.error_class().map(|c| c.symbol()).unwrap_or(" ");
        println!(
            "{} [{}] {} ({} unread)\n    {}",
            marker,
            feed.id,
            feed.display_title(),
            unread,
            feed.url
        );
    }

    Ok(())
}

pub fn list_items(ctx: &AppContext) -> Result<()> {
    let items = ctx.store.get_all_items()?;

    if items.is_empty() {
        println!("No items");
        return Ok(());
    }

    for item in items {
        let read_marker = if item.read { " " } else { "*" };

        let date = item
            .published
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());

        println!("{} {} {}", read_marker, date, item.display_title());
    }

    Ok(())
}

pub async fn run_daemon(
    ctx: Arc<AppContext>,
    interval: Option<&str>,
    no_initial_update: bool,
) -> Result<()> {
    let mut config = DaemonConfig::from_refresh(&ctx.config.refresh)?;
    if let Some(interval) = interval {
        let secs = parse_interval(interval).map_err(NewsflowError::Other)?;
        config.interval = Duration::from_secs(secs);
    }
    if no_initial_update {
        config.update_on_start = false;
    }

    Daemon::new(ctx, config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(matches!(
            validate_url("not a url"),
            Err(NewsflowError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.com/feed.xml"),
            Err(NewsflowError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_hides_then_purges() {
        let ctx = AppContext::in_memory(Config::default()).unwrap();
        let url = "https://example.com/feed.xml";
        ctx.store.add_feed(&Feed::new(url.to_string())).unwrap();

        remove_feed(&ctx, url, false).unwrap();
        assert!(ctx.store.list_feeds().unwrap().is_empty());
        assert_eq!(ctx.store.list_all_feeds().unwrap().len(), 1);

        // re-adding a hidden feed restores it without fetching
        add_feed(&ctx, url).await.unwrap();
        assert_eq!(ctx.store.list_feeds().unwrap().len(), 1);

        remove_feed(&ctx, url, true).unwrap();
        assert!(ctx.store.get_feed_by_url(url).unwrap().is_none());
        assert!(matches!(
            remove_feed(&ctx, url, true),
            Err(NewsflowError::FeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_with_no_feeds() {
        let ctx = AppContext::in_memory(Config::default()).unwrap();
        refresh(&ctx, None).await.unwrap();
        assert!(!ctx.scheduler.is_running());
    }
}
