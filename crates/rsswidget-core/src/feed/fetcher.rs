use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, USER_AGENT};
use reqwest::{Client, Proxy};
use url::Url;

use super::models::RawArticle;
use super::parser::parse_feed;
use crate::config::FetchConfig;
use crate::{Error, Result};

const MAX_REDIRECTS: usize = 10;

/// Something that can turn a feed URL into its articles.
///
/// Implementations must tolerate concurrent calls for different URLs. Any error
/// is treated by the cache as a failed fetch; there is no retry at this level.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<RawArticle>>;
}

/// HTTP feed fetcher
pub struct FeedFetcher {
    client: Client,
    max_feed_bytes: usize,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Self::build_client(config.request_timeout_secs, &config.proxy_url)?;

        Ok(Self {
            client,
            max_feed_bytes: config.max_feed_bytes,
        })
    }

    /// Build HTTP client with optional timeout and proxy
    fn build_client(timeout_secs: Option<u64>, proxy_url: &Option<String>) -> Result<Client> {
        let mut builder = Client::builder()
            .default_headers(Self::build_headers())
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        if let Some(ref proxy) = proxy_url {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
            tracing::info!("Using HTTP proxy for feed fetching");
        }

        builder.build().map_err(Error::Http)
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/rss+xml,application/atom+xml,application/feed+json,application/xml;q=0.9,text/xml;q=0.9,*/*;q=0.8"
            )
        );
        headers.insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br")
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("rsswidget/", env!("CARGO_PKG_VERSION")))
        );
        headers
    }

    async fn download(&self, url: &Url) -> Result<Bytes> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::FeedParse(format!("HTTP {} for URL: {}", status, url)));
        }

        if let Some(len) = response.content_length() {
            self.ensure_content_size(declared_length(len), url.as_str())?;
        }

        let content = response.bytes().await?;
        self.ensure_content_size(content.len(), url.as_str())?;

        Ok(content)
    }

    fn ensure_content_size(&self, size: usize, url: &str) -> Result<()> {
        if size > self.max_feed_bytes {
            return Err(Error::FeedParse(format!(
                "Feed too large ({} bytes) for URL: {}",
                size,
                url
            )));
        }
        Ok(())
    }
}

/// A Content-Length that does not fit in `usize` is treated as too large
fn declared_length(len: u64) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX)
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawArticle>> {
        let url = Url::parse(url)?;

        tracing::info!("Fetching feed from: {}", url);

        let content = self.download(&url).await?;
        parse_feed(&content)
    }
}
