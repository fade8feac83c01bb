//! Request/response format for the widget server
//!
//! One JSON object per line in each direction, JSON-RPC style.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::feed::Entry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";
    pub const FEED_RESOLVE: &str = "feed.resolve";
}

/// Widget settings as submitted. `limit` may be a number, a numeric string, or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResolveParams {
    pub feed: String,
    #[serde(default)]
    pub limit: serde_json::Value,
}

impl FeedResolveParams {
    /// Interpret `limit` the same way widget settings are sanitized
    pub fn limit_text(&self) -> String {
        match &self.limit {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResolveResponse {
    pub feed: String,
    pub limit: Option<i64>,
    pub entries: Vec<Entry>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
