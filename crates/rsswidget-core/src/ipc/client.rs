//! Client for talking to a running widget server

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::*;
use crate::{Error, Result};

#[derive(Clone)]
pub struct WidgetClient {
    socket_path: PathBuf,
}

impl WidgetClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if the server answers
    pub async fn ping(&self) -> bool {
        self.call(methods::PING, serde_json::Value::Null).await.is_ok()
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Resolve a feed through the server's shared cache
    pub async fn resolve(&self, feed: &str, limit: &str) -> Result<FeedResolveResponse> {
        let params = serde_json::json!({
            "feed": feed,
            "limit": limit
        });
        let result = self.call(methods::FEED_RESOLVE, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to widget server at {}: {}. Is it running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(Error::Other(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}
