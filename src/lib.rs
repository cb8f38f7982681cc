//! # Newsflow
//!
//! A feed refresh engine: conditional HTTP fetching of RSS/Atom feeds,
//! executed by a bounded background worker pool.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator → Scheduler → FeedRefreshHandler → FeedRefresher → Store
//!       ↑            │
//!       └── events ──┘
//! ```
//!
//! - [`orchestrator`]: caps outstanding refresh tasks and tops up the batch
//!   as tasks finish
//! - [`tasks`]: fixed worker pool over a bounded queue, publishing lifecycle
//!   events
//! - [`fetcher`]: conditional GET plus the single-feed refresh algorithm
//! - [`normalizer`]: RSS/Atom/JSON Feed parsing into domain items
//! - [`store`]: SQLite persistence
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a feed
//! newsflow add https://blog.rust-lang.org/feed.xml
//!
//! # Refresh everything once
//! newsflow refresh
//!
//! # Refresh every 30 minutes until interrupted
//! newsflow daemon --interval 30m
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetcher, refresher and scheduler.
pub mod app;

/// Command-line interface using clap.
///
/// - `add <url>` - Add a feed and fetch it once
/// - `remove <url> [--purge]` - Hide or delete a feed
/// - `list [--items]` - List feeds or items
/// - `refresh [feed_id]` - Refresh one or all feeds
/// - `daemon` - Refresh on an interval
pub mod cli;

/// Configuration loaded from `~/.config/newsflow/config.toml`.
pub mod config;

/// Foreground periodic refresher.
pub mod daemon;

/// Core domain models.
///
/// - [`Feed`](domain::Feed): feed metadata, cache validators and last error
/// - [`Item`](domain::Item): entries keyed by `(feed_id, guid)`
pub mod domain;

/// HTTP fetching with conditional requests and `Cache-Control` freshness.
///
/// - [`Fetcher`](fetcher::Fetcher): async trait for one conditional GET
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
/// - [`FeedRefresher`](fetcher::FeedRefresher): refreshes one stored feed
pub mod fetcher;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into unified [`Item`](domain::Item) structs.
pub mod normalizer;

/// Batch refresh orchestration on top of the scheduler.
pub mod orchestrator;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Background task scheduler.
pub mod tasks;
