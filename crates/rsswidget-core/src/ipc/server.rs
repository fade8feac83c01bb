//! Widget server
//!
//! Listens on a Unix socket and answers feed requests from page renderers.
//! Every connection shares one `FeedCache`, so concurrent requests for the
//! same feed ride on a single upstream fetch.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::cache::FeedCache;
use crate::widget::{self, FeedItem};
use crate::Result;

pub struct WidgetServer {
    cache: FeedCache,
    socket_path: PathBuf,
    purge_interval: Option<Duration>,
    start_time: Instant,
}

impl WidgetServer {
    pub fn new(cache: FeedCache, socket_path: PathBuf) -> Self {
        Self {
            cache,
            socket_path,
            purge_interval: None,
            start_time: Instant::now(),
        }
    }

    /// Sweep stale cache entries every `secs` seconds (0 disables the sweep)
    pub fn with_purge_interval(mut self, secs: u64) -> Self {
        self.purge_interval = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        // Remove old socket file if exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Widget server listening on: {}", self.socket_path.display());

        // A disabled sweep still needs a branch for select!; it just never fires
        let mut purge = tokio::time::interval(self.purge_interval.unwrap_or(Duration::from_secs(3600)));
        purge.tick().await;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let cache = self.cache.clone();
                            let start_time = self.start_time;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, cache, start_time).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = purge.tick(), if self.purge_interval.is_some() => {
                    let purged = self.cache.purge_expired();
                    if purged > 0 {
                        debug!("Purged {} stale feed cache entries", purged);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Widget server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, cache: FeedCache, start_time: Instant) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handle_request(request, &cache, start_time).await
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn handle_request(request: Request, cache: &FeedCache, start_time: Instant) -> Response {
    let id = request.id;

    match request.method.as_str() {
        methods::PING => Response::success(id, serde_json::json!({"pong": true})),

        methods::STATUS => {
            let status = StatusResponse {
                uptime_secs: start_time.elapsed().as_secs(),
                cache: cache.stats(),
            };
            to_response(id, &status)
        }

        methods::FEED_RESOLVE => {
            let params: FeedResolveParams = match serde_json::from_value(request.params) {
                Ok(p) => p,
                Err(e) => return Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            };
            if params.feed.trim().is_empty() {
                return Response::error(id, ERR_INVALID_PARAMS, "feed must not be empty");
            }

            let mut item = FeedItem::sanitize(&params.feed, &params.limit_text());
            widget::fill(cache, &mut item).await;

            let response = FeedResolveResponse {
                feed: item.feed,
                limit: item.limit,
                entries: item.entries.to_vec(),
                failed: item.failed,
            };
            to_response(id, &response)
        }

        other => Response::error(id, ERR_METHOD_NOT_FOUND, format!("Unknown method: {}", other)),
    }
}

fn to_response<T: serde::Serialize>(id: Uuid, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(v) => Response::success(id, v),
        Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
    }
}
