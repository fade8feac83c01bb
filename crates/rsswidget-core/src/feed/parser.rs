use chrono::{DateTime, Utc};
use feed_rs::parser;

use super::models::RawArticle;
use crate::{Error, Result};

/// Parse RSS/Atom/JSON feed content into articles, in document order
pub fn parse_feed(content: &[u8]) -> Result<Vec<RawArticle>> {
    let feed = parser::parse(content)
        .map_err(|e| Error::FeedParse(e.to_string()))?;

    let articles = feed.entries.into_iter().map(|entry| {
        let title = entry.title.map(|t| t.content);

        // RSS <description> lands in summary; Atom-only feeds may carry just content
        let description = entry.summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body));

        let pub_date = entry.published
            .or(entry.updated)
            .map(|dt| DateTime::<Utc>::from(dt));

        let link = entry.links.first().map(|l| l.href.clone());

        RawArticle {
            title,
            description,
            pub_date,
            link,
        }
    }).collect();

    Ok(articles)
}
