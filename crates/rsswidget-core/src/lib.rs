pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod ipc;
pub mod widget;

pub use cache::{FeedCache, FeedResult, FetchKey, Resolution};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use ipc::{WidgetClient, WidgetServer};
