use anyhow::Result;

use rsswidget_core::{AppConfig, WidgetClient};

pub async fn run(config: &AppConfig) -> Result<()> {
    let client = WidgetClient::new(config.socket_path());

    if !client.ping().await {
        println!("Widget server is not running ({})", config.socket_path().display());
        return Ok(());
    }

    let status = client.status().await?;
    println!("Widget server is running");
    println!("  Uptime: {} seconds", status.uptime_secs);
    println!("  Cached feeds: {}", status.cache.entries);
    println!("  Fetches in flight: {}", status.cache.pending);
    println!("  TTL: {} ms", status.cache.ttl_ms);

    Ok(())
}
