//! Unix socket front end for page renderers
//!
//! A renderer that decided to defer a feed asks the widget server for it
//! here instead of fetching the feed itself.

mod client;
mod protocol;
mod server;

pub use client::WidgetClient;
pub use protocol::*;
pub use server::WidgetServer;
