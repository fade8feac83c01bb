use std::sync::Arc;

use anyhow::Result;

use rsswidget_core::{
    feed::FeedFetcher,
    widget::{self, FeedItem},
    AppConfig, FeedCache,
};

use super::print_entries;

pub async fn run(config: &AppConfig, feed: &str, limit: &str, concurrency: usize) -> Result<()> {
    let fetcher = Arc::new(FeedFetcher::new(&config.fetch)?);
    let cache = FeedCache::new(fetcher, &config.cache);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..concurrency.max(1) {
        let cache = cache.clone();
        let mut item = FeedItem::sanitize(feed, limit);
        tasks.spawn(async move {
            widget::fill(&cache, &mut item).await;
            item
        });
    }

    let mut items = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        items.push(joined?);
    }

    let stats = cache.stats();
    tracing::debug!("{} request(s) served by {} cached fetch(es)", items.len(), stats.entries);

    let Some(item) = items.first() else {
        return Ok(());
    };

    println!("Feed: {}\n", item.feed);
    if item.failed {
        println!("Feed could not be fetched.");
        return Ok(());
    }
    if item.entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }
    print_entries(item.entries.iter());

    Ok(())
}
