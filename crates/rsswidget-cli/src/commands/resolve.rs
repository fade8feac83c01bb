use anyhow::Result;

use rsswidget_core::{AppConfig, WidgetClient};

use super::print_entries;

pub async fn run(config: &AppConfig, feed: &str, limit: &str) -> Result<()> {
    let client = WidgetClient::new(config.socket_path());
    let response = client.resolve(feed, limit).await?;

    println!("Feed: {}\n", response.feed);
    if response.failed {
        println!("Feed could not be fetched.");
    } else if response.entries.is_empty() {
        println!("No entries.");
    } else {
        print_entries(&response.entries);
    }

    Ok(())
}
