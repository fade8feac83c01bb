use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::entry::{CacheEntry, FeedResult};
use super::key::FetchKey;
use crate::config::CacheConfig;
use crate::feed::{Entry, FeedSource};

/// Callers waiting on one in-flight fetch. The caller that started the fetch is first.
struct PendingGroup {
    waiters: Vec<oneshot::Sender<FeedResult>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FetchKey, CacheEntry>,
    pending: HashMap<FetchKey, PendingGroup>,
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub ttl_ms: u64,
}

/// What `FeedCache::resolve` hands back
#[derive(Debug)]
pub enum Resolution {
    /// Served from a fresh cache entry
    Ready(FeedResult),
    /// Queued behind an in-flight fetch
    Waiting(oneshot::Receiver<FeedResult>),
}

impl Resolution {
    pub fn is_ready(&self) -> bool {
        matches!(self, Resolution::Ready(_))
    }

    /// Wait for the fetch outcome
    pub async fn wait(self) -> FeedResult {
        match self {
            Resolution::Ready(result) => result,
            // The fetch task always drains its waiters; a dropped sender means the runtime is going away
            Resolution::Waiting(rx) => rx.await.unwrap_or_else(|_| FeedResult::failure()),
        }
    }
}

/// Feed fetch cache with request coalescing.
///
/// For a given [`FetchKey`] a call either reads a fresh cached result, joins the
/// fetch already running for that key, or starts the one and only fetch for it.
/// Failures are cached like successes, so a broken feed is tried at most once
/// per TTL window no matter how many callers ask for it.
///
/// The handle is cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FeedCache {
    state: Arc<Mutex<CacheState>>,
    source: Arc<dyn FeedSource>,
    ttl: Duration,
    max_entries: Option<usize>,
}

impl FeedCache {
    pub fn new(source: Arc<dyn FeedSource>, config: &CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            source,
            ttl: config.ttl(),
            max_entries: config.max_entries.map(|max| max.max(1)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a key without blocking.
    ///
    /// Must be called from within a tokio runtime: on a miss the fetch is
    /// spawned onto it and the returned [`Resolution`] completes once that
    /// fetch does.
    pub fn resolve(&self, key: FetchKey) -> Resolution {
        // One timestamp for both the freshness check and the eventual cache write
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock();

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(now, self.ttl) {
                    debug!(key = %key, failed = entry.failed(), "Feed cache hit");
                    return Resolution::Ready(entry.result());
                }
            }

            if let Some(group) = state.pending.get_mut(&key) {
                group.waiters.push(tx);
                debug!(key = %key, waiters = group.waiters.len(), "Joined in-flight feed fetch");
                return Resolution::Waiting(rx);
            }

            state.pending.insert(key.clone(), PendingGroup { waiters: vec![tx] });
        }

        debug!(key = %key, "Starting feed fetch");
        let cache = self.clone();
        tokio::spawn(async move {
            cache.run_fetch(key, now).await;
        });

        Resolution::Waiting(rx)
    }

    /// Callback form of [`resolve`](Self::resolve). `on_done` runs exactly once:
    /// inline on a fresh hit, on a runtime task otherwise.
    pub fn resolve_with<F>(&self, key: FetchKey, on_done: F)
    where
        F: FnOnce(FeedResult) + Send + 'static,
    {
        match self.resolve(key) {
            Resolution::Ready(result) => on_done(result),
            waiting => {
                tokio::spawn(async move {
                    on_done(waiting.wait().await);
                });
            }
        }
    }

    async fn run_fetch(self, key: FetchKey, started_at: Instant) {
        let source = self.source.clone();
        let url = key.feed().to_string();

        // Separate task so a panicking source still lets us drain the waiters
        let outcome = tokio::spawn(async move { source.fetch(&url).await }).await;

        let result = match outcome {
            Ok(Ok(articles)) => {
                let count = key.take_count(articles.len());
                FeedResult::success(articles.into_iter().take(count).map(Entry::from).collect())
            }
            Ok(Err(e)) => {
                warn!("Failed to fetch feed {}: {}", key.feed(), e);
                FeedResult::failure()
            }
            Err(e) => {
                error!("Feed fetch task for {} aborted: {}", key.feed(), e);
                FeedResult::failure()
            }
        };

        self.complete(key, started_at, result);
    }

    /// Store the outcome and release every waiter in one step
    fn complete(&self, key: FetchKey, started_at: Instant, result: FeedResult) {
        let mut state = self.lock();

        self.insert_entry(&mut state, key.clone(), CacheEntry::new(&result, started_at));

        let waiters = state
            .pending
            .remove(&key)
            .map(|group| group.waiters)
            .unwrap_or_default();

        debug!(
            key = %key,
            entries = result.entries.len(),
            failed = result.failed,
            waiters = waiters.len(),
            "Feed fetch complete"
        );

        for waiter in waiters {
            // A waiter that went away just misses the result
            let _ = waiter.send(result.clone());
        }
    }

    fn insert_entry(&self, state: &mut CacheState, key: FetchKey, entry: CacheEntry) {
        if let Some(max) = self.max_entries {
            if !state.entries.contains_key(&key) && state.entries.len() >= max {
                let now = Instant::now();
                let ttl = self.ttl;
                state.entries.retain(|_, e| e.is_fresh(now, ttl));

                if state.entries.len() >= max {
                    let oldest = state
                        .entries
                        .iter()
                        .min_by_key(|(_, e)| e.fetched_at())
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        debug!(key = %oldest, "Evicting oldest feed cache entry");
                        state.entries.remove(&oldest);
                    }
                }
            }
        }

        state.entries.insert(key, entry);
    }

    /// Whether any entry, fresh or stale, is stored for `key`
    pub fn contains(&self, key: &FetchKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Drop entries whose TTL has lapsed. In-flight fetches are untouched.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_fresh(now, ttl));
        before - state.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            pending: state.pending.len(),
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RawArticle;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::advance;

    #[derive(Default)]
    struct MockSource {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
        articles: usize,
        fail: bool,
        panic: bool,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockSource {
        fn with_articles(articles: usize) -> Self {
            Self { articles, ..Default::default() }
        }

        fn gated(articles: usize) -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            (Self { articles, gate: Some(gate.clone()), ..Default::default() }, gate)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for MockSource {
        async fn fetch(&self, url: &str) -> Result<Vec<RawArticle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.panic {
                panic!("source blew up");
            }
            if self.fail {
                return Err(Error::FeedParse("not a feed".to_string()));
            }

            Ok((0..self.articles)
                .map(|i| RawArticle {
                    title: Some(format!("Article {}", i)),
                    description: Some(format!("<p>Body {}</p>", i)),
                    pub_date: None,
                    link: Some(format!("{}/{}", url, i)),
                })
                .collect())
        }
    }

    fn cache_with(source: Arc<MockSource>, ttl_ms: u64) -> FeedCache {
        let config = CacheConfig { ttl_ms, ..Default::default() };
        FeedCache::new(source, &config)
    }

    #[tokio::test]
    async fn test_miss_fetches_and_truncates_in_order() {
        let source = Arc::new(MockSource::with_articles(8));
        let cache = cache_with(source.clone(), 60_000);

        let result = cache.resolve(FetchKey::new("example.com/a", Some(5))).wait().await;

        assert!(!result.failed);
        let titles: Vec<_> = result.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["Article 0", "Article 1", "Article 2", "Article 3", "Article 4"]);
        assert_eq!(result.entries[0].body, "<p>Body 0</p>");
        assert_eq!(source.calls(), 1);
        assert_eq!(*source.urls.lock().unwrap(), ["http://example.com/a"]);
        assert_eq!(cache.stats(), CacheStats { entries: 1, pending: 0, ttl_ms: 60_000 });
    }

    #[tokio::test]
    async fn test_short_feed_keeps_everything() {
        let source = Arc::new(MockSource::with_articles(2));
        let cache = cache_with(source, 60_000);

        let result = cache.resolve(FetchKey::new("x", Some(10))).wait().await;
        assert_eq!(result.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_or_missing_limit_yields_no_entries() {
        let source = Arc::new(MockSource::with_articles(4));
        let cache = cache_with(source.clone(), 60_000);

        for limit in [Some(0), None] {
            let result = cache.resolve(FetchKey::new("x", limit)).wait().await;
            assert!(!result.failed);
            assert!(result.entries.is_empty());
        }
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_negative_limit_drops_from_the_end() {
        let source = Arc::new(MockSource::with_articles(8));
        let cache = cache_with(source.clone(), 60_000);

        let result = cache.resolve(FetchKey::new("x", Some(-2))).wait().await;
        let titles: Vec<_> = result.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            ["Article 0", "Article 1", "Article 2", "Article 3", "Article 4", "Article 5"]
        );

        let result = cache.resolve(FetchKey::new("y", Some(-10))).wait().await;
        assert!(!result.failed);
        assert!(result.entries.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coalescing_across_worker_threads() {
        let (source, gate) = MockSource::gated(8);
        let source = Arc::new(source);
        let cache = cache_with(source.clone(), 60_000);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.resolve(FetchKey::new("x", Some(3))).wait().await });
        }

        // Hold the fetch while the callers race through the decision step
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.stats().pending <= 1);
        gate.add_permits(1);

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.unwrap());
        }

        assert_eq!(results.len(), 64);
        assert_eq!(source.calls(), 1);
        assert_eq!(results[0].entries.len(), 3);
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(cache.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let (source, gate) = MockSource::gated(8);
        let source = Arc::new(source);
        let cache = cache_with(source.clone(), 60_000);

        let resolutions: Vec<_> = (0..5)
            .map(|_| cache.resolve(FetchKey::new("x", Some(3))))
            .collect();

        assert!(resolutions.iter().all(|r| !r.is_ready()));
        assert_eq!(cache.stats().pending, 1);

        gate.add_permits(1);
        let mut results = Vec::new();
        for resolution in resolutions {
            results.push(resolution.wait().await);
        }

        assert_eq!(source.calls(), 1);
        assert_eq!(results[0].entries.len(), 3);
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(cache.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_resolve_returns_before_fetch_completes() {
        let (source, gate) = MockSource::gated(1);
        let cache = cache_with(Arc::new(source), 60_000);

        let resolution = cache.resolve(FetchKey::new("slow.example.com", Some(1)));
        tokio::task::yield_now().await;

        assert!(!resolution.is_ready());
        assert_eq!(cache.stats().pending, 1);
        assert!(!cache.contains(&FetchKey::new("slow.example.com", Some(1))));

        gate.add_permits(1);
        assert_eq!(resolution.wait().await.entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_until_ttl_lapses() {
        let source = Arc::new(MockSource::with_articles(3));
        let cache = cache_with(source.clone(), 60_000);
        let key = FetchKey::new("x", Some(3));

        cache.resolve(key.clone()).wait().await;
        assert_eq!(source.calls(), 1);

        advance(Duration::from_millis(59_999)).await;
        let hit = cache.resolve(key.clone());
        assert!(hit.is_ready());
        assert_eq!(hit.wait().await.entries.len(), 3);
        assert_eq!(source.calls(), 1);

        advance(Duration::from_millis(1)).await;
        let refresh = cache.resolve(key.clone());
        assert!(!refresh.is_ready());
        refresh.wait().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_measured_from_fetch_start() {
        let (source, gate) = MockSource::gated(1);
        let source = Arc::new(source);
        let cache = cache_with(source.clone(), 60_000);
        let key = FetchKey::new("x", Some(1));

        let first = cache.resolve(key.clone());
        advance(Duration::from_secs(30)).await;
        gate.add_permits(1);
        first.wait().await;

        advance(Duration::from_secs(30)).await;
        let second = cache.resolve(key);
        assert!(!second.is_ready());
        gate.add_permits(1);
        second.wait().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_refresh_wins_over_stale_entry() {
        let (source, gate) = MockSource::gated(2);
        let source = Arc::new(source);
        let cache = cache_with(source.clone(), 1_000);
        let key = FetchKey::new("x", Some(2));

        gate.add_permits(1);
        cache.resolve(key.clone()).wait().await;
        advance(Duration::from_secs(2)).await;

        let refresh = cache.resolve(key.clone());
        let joined = cache.resolve(key.clone());
        assert!(!refresh.is_ready());
        assert!(!joined.is_ready());
        assert!(cache.contains(&key));

        gate.add_permits(1);
        assert_eq!(refresh.wait().await, joined.wait().await);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_limits_do_not_share_entries_or_fetches() {
        let (source, gate) = MockSource::gated(8);
        let source = Arc::new(source);
        let cache = cache_with(source.clone(), 60_000);

        let three = cache.resolve(FetchKey::new("x", Some(3)));
        let four = cache.resolve(FetchKey::new("x", Some(4)));
        assert_eq!(cache.stats().pending, 2);

        gate.add_permits(2);
        assert_eq!(three.wait().await.entries.len(), 3);
        assert_eq!(four.wait().await.entries.len(), 4);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_cached_for_ttl() {
        let source = Arc::new(MockSource { fail: true, ..Default::default() });
        let cache = cache_with(source.clone(), 60_000);
        let key = FetchKey::new("bad-url", Some(5));

        let first = cache.resolve(key.clone()).wait().await;
        assert!(first.failed);
        assert!(first.entries.is_empty());

        advance(Duration::from_secs(1)).await;
        let second = cache.resolve(key.clone());
        assert!(second.is_ready());
        assert_eq!(second.wait().await, FeedResult::failure());
        assert_eq!(source.calls(), 1);
        assert_eq!(*source.urls.lock().unwrap(), ["http://bad-url"]);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(MockSource { fail: true, gate: Some(gate.clone()), ..Default::default() });
        let cache = cache_with(source.clone(), 60_000);

        let a = cache.resolve(FetchKey::new("down.example.com", Some(5)));
        let b = cache.resolve(FetchKey::new("down.example.com", Some(5)));
        gate.add_permits(1);

        assert!(a.wait().await.failed);
        assert!(b.wait().await.failed);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_source_still_drains_waiters() {
        let source = Arc::new(MockSource { panic: true, ..Default::default() });
        let cache = cache_with(source, 60_000);
        let key = FetchKey::new("x", Some(1));

        let a = cache.resolve(key.clone());
        let b = cache.resolve(key.clone());

        assert!(a.wait().await.failed);
        assert!(b.wait().await.failed);
        assert_eq!(cache.stats().pending, 0);
        assert!(cache.resolve(key).is_ready());
    }

    #[tokio::test]
    async fn test_resolve_with_runs_inline_on_hit() {
        let source = Arc::new(MockSource::with_articles(2));
        let cache = cache_with(source, 60_000);
        let key = FetchKey::new("x", Some(2));

        let (tx, rx) = oneshot::channel();
        cache.resolve_with(key.clone(), move |result| {
            let _ = tx.send(result);
        });
        let fetched = rx.await.unwrap();
        assert_eq!(fetched.entries.len(), 2);

        let inline = Arc::new(Mutex::new(None));
        let slot = inline.clone();
        cache.resolve_with(key, move |result| {
            *slot.lock().unwrap() = Some(result);
        });
        assert_eq!(inline.lock().unwrap().take(), Some(fetched));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_oldest() {
        let source = Arc::new(MockSource::with_articles(1));
        let config = CacheConfig { ttl_ms: 60_000, max_entries: Some(2), ..Default::default() };
        let cache = FeedCache::new(source, &config);

        for feed in ["a", "b", "c"] {
            cache.resolve(FetchKey::new(feed, Some(1))).wait().await;
            advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.stats().entries, 2);
        assert!(!cache.contains(&FetchKey::new("a", Some(1))));
        assert!(cache.contains(&FetchKey::new("b", Some(1))));
        assert!(cache.contains(&FetchKey::new("c", Some(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_fresh_and_pending() {
        let (source, gate) = MockSource::gated(1);
        let cache = cache_with(Arc::new(source), 10_000);

        gate.add_permits(1);
        cache.resolve(FetchKey::new("old", Some(1))).wait().await;
        advance(Duration::from_secs(8)).await;
        gate.add_permits(1);
        cache.resolve(FetchKey::new("new", Some(1))).wait().await;
        let pending = cache.resolve(FetchKey::new("slow", Some(1)));
        advance(Duration::from_secs(3)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert!(!cache.contains(&FetchKey::new("old", Some(1))));
        assert!(cache.contains(&FetchKey::new("new", Some(1))));
        assert_eq!(cache.stats().pending, 1);

        gate.add_permits(1);
        pending.wait().await;
    }
}
