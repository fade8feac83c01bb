use std::fmt;

use serde::{Deserialize, Serialize};

const DEFAULT_SCHEME: &str = "http://";

/// Identity of a cached fetch: the normalized feed URL plus the entry limit.
///
/// Both fields participate in equality, so two widgets pointing at the same
/// feed with different limits never share a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchKey {
    feed: String,
    limit: Option<i64>,
}

impl FetchKey {
    pub fn new(feed: &str, limit: Option<i64>) -> Self {
        Self {
            feed: normalize_feed_url(feed),
            limit,
        }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// How many leading upstream articles to keep, out of `available`.
    ///
    /// A negative limit counts from the end, so `-2` drops the last two.
    /// A limit that was not a number keeps nothing.
    pub fn take_count(&self, available: usize) -> usize {
        match self.limit {
            Some(limit) if limit >= 0 => available.min(usize::try_from(limit).unwrap_or(usize::MAX)),
            Some(limit) => {
                available.saturating_sub(usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX))
            }
            None => 0,
        }
    }
}

impl fmt::Display for FetchKey {
    /// Canonical JSON form: `{"feed":"…","limit":5}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Prefix `http://` unless the URL already starts with `http://` or `https://`
pub fn normalize_feed_url(feed: &str) -> String {
    let feed = feed.trim();
    if feed.starts_with("http://") || feed.starts_with("https://") {
        feed.to_string()
    } else {
        format!("{}{}", DEFAULT_SCHEME, feed)
    }
}

/// Parse a leading decimal integer the lenient way widget settings arrive:
/// surrounding whitespace and a sign are accepted, trailing garbage is ignored,
/// and a value without any leading digits yields `None`.
pub fn parse_limit(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };

    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    // Saturate absurdly long inputs instead of rejecting them
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}
