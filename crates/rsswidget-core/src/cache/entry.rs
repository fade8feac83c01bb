use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::feed::Entry;

/// Outcome of a resolve, handed to every caller waiting on the same key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedResult {
    pub entries: Arc<Vec<Entry>>,
    pub failed: bool,
}

impl FeedResult {
    pub fn success(entries: Vec<Entry>) -> Self {
        Self {
            entries: Arc::new(entries),
            failed: false,
        }
    }

    pub fn failure() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            failed: true,
        }
    }
}

/// A stored fetch outcome. Replaced wholesale on refresh, never edited.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    entries: Arc<Vec<Entry>>,
    failed: bool,
    fetched_at: Instant,
}

impl CacheEntry {
    pub fn new(result: &FeedResult, fetched_at: Instant) -> Self {
        Self {
            entries: result.entries.clone(),
            failed: result.failed,
            fetched_at,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Whether the entry is still inside its TTL window at `now`
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }

    pub fn result(&self) -> FeedResult {
        FeedResult {
            entries: self.entries.clone(),
            failed: self.failed,
        }
    }
}
