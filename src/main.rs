use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsflow::app::AppContext;
use newsflow::cli::{commands, Cli, Commands};
use newsflow::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "newsflow=debug" } else { "newsflow=info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Add { url } => {
            commands::add_feed(&ctx, &url).await?;
        }
        Commands::Remove { url, purge } => {
            commands::remove_feed(&ctx, &url, purge)?;
        }
        Commands::List { items } => {
            if items {
                commands::list_items(&ctx)?;
            } else {
                commands::list_feeds(&ctx)?;
            }
        }
        Commands::Refresh { feed_id } => {
            commands::refresh(&ctx, feed_id).await?;
        }
        Commands::Daemon {
            interval,
            no_initial_update,
        } => {
            commands::run_daemon(Arc::new(ctx), interval.as_deref(), no_initial_update).await?;
        }
    }

    Ok(())
}
