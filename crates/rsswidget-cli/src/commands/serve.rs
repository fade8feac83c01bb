use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use rsswidget_core::{feed::FeedFetcher, AppConfig, FeedCache, WidgetServer};

pub async fn run(config: &AppConfig) -> Result<()> {
    let fetcher = Arc::new(FeedFetcher::new(&config.fetch)?);
    let cache = FeedCache::new(fetcher, &config.cache);
    let server = WidgetServer::new(cache, config.socket_path())
        .with_purge_interval(config.cache.purge_interval_secs);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    println!(
        "Widget server started on {} (TTL {} ms). Press Ctrl+C to stop.",
        config.socket_path().display(),
        config.cache.ttl_ms
    );

    server.run(shutdown_rx).await?;

    println!("Widget server stopped.");
    Ok(())
}
