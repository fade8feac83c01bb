use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rsswidget_core::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "rsswidget")]
#[command(author, version, about = "Cached, coalesced RSS feeds for page widgets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a feed once through a local cache and print its entries
    Fetch {
        /// Feed URL (http:// is assumed when no scheme is given)
        feed: String,
        /// Maximum number of entries
        #[arg(short = 'l', long, default_value = "5")]
        limit: String,
        /// Resolve the same feed this many times concurrently
        #[arg(short = 'c', long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Run the widget server until interrupted
    Serve,
    /// Ask the running widget server for a feed
    Resolve {
        /// Feed URL (http:// is assumed when no scheme is given)
        feed: String,
        /// Maximum number of entries
        #[arg(short = 'l', long, default_value = "5")]
        limit: String,
    },
    /// Show widget server status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Fetch { feed, limit, concurrency } => {
            commands::fetch::run(&config, &feed, &limit, concurrency).await
        }
        Commands::Serve => commands::serve::run(&config).await,
        Commands::Resolve { feed, limit } => commands::resolve::run(&config, &feed, &limit).await,
        Commands::Status => commands::status::run(&config).await,
    }
}
