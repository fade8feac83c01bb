mod fetcher;
mod models;
mod parser;

pub use fetcher::{FeedFetcher, FeedSource};
pub use models::{Entry, RawArticle};
pub use parser::parse_feed;
