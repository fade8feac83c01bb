//! The feed widget as seen by a page renderer.
//!
//! During page render the widget only consumes the cache when it already knows
//! the feed; a cold feed is flagged for the browser to fetch separately so the
//! page itself never waits on a remote server.

use std::sync::Arc;

use crate::cache::{normalize_feed_url, parse_limit, FeedCache, FeedResult, FetchKey};
use crate::feed::Entry;

/// A widget instance: its settings plus the result fields filled in on load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub feed: String,
    pub limit: Option<i64>,
    pub entries: Arc<Vec<Entry>>,
    pub failed: bool,
    /// Set when the renderer should leave the feed to a follow-up request
    pub ajax: bool,
}

impl FeedItem {
    /// Build an item from raw widget settings, applying the scheme default and
    /// lenient limit parsing
    pub fn sanitize(feed: &str, limit: &str) -> Self {
        Self {
            feed: normalize_feed_url(feed),
            limit: parse_limit(limit),
            ..Default::default()
        }
    }

    pub fn key(&self) -> FetchKey {
        FetchKey::new(&self.feed, self.limit)
    }

    fn apply(&mut self, result: FeedResult) {
        self.entries = result.entries;
        self.failed = result.failed;
    }
}

/// Resolve the item through the cache and populate its result fields
pub async fn fill(cache: &FeedCache, item: &mut FeedItem) {
    let result = cache.resolve(item.key()).wait().await;
    item.apply(result);
}

/// Page-render loader: fill inline if the cache knows this feed, otherwise
/// mark the item for a deferred fetch and return at once
pub async fn load(cache: &FeedCache, item: &mut FeedItem) {
    if cache.contains(&item.key()) {
        fill(cache, item).await;
    } else {
        tracing::debug!("Deferring uncached feed {} to a follow-up request", item.feed);
        item.ajax = true;
    }
}
