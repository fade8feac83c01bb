//! Process-local feed cache with request coalescing.
//!
//! A key moves through `absent -> pending -> cached(fresh) -> cached(stale) -> pending -> ...`.
//! While pending, every caller for that key joins the single outbound fetch and
//! receives the same result when it lands.

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, FeedResult};
pub use key::{normalize_feed_url, parse_limit, FetchKey};
pub use store::{CacheStats, FeedCache, Resolution};
