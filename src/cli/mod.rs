pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "newsflow")]
#[command(about = "A feed refresher with a background task scheduler", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.config/newsflow/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new feed and fetch it once
    Add {
        /// URL of the feed to add
        url: String,
    },
    /// Hide a feed, or delete it with its items
    Remove {
        /// URL of the feed to remove
        url: String,

        /// Delete the feed and its items instead of hiding it
        #[arg(long)]
        purge: bool,
    },
    /// List feeds or items
    List {
        /// Show items instead of feeds
        #[arg(long)]
        items: bool,
    },
    /// Refresh one feed, or every visible feed
    Refresh {
        /// Feed id as shown by `list`
        feed_id: Option<i64>,
    },
    /// Refresh all feeds periodically until interrupted
    Daemon {
        /// Update interval (e.g., "1h", "30m", "6h", "1d"); overrides config
        #[arg(short, long)]
        interval: Option<String>,

        /// Skip initial update on start
        #[arg(long)]
        no_initial_update: bool,
    },
}
