//! Unified error type for the cache builder.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cache store unavailable at {path}: {reason}")]
    StoreUnavailable { path: String, reason: String },

    #[error("Cache file format error: {0}")]
    CacheFormat(String),

    #[error("Not cached: {0}")]
    NotCached(String),

    #[error("Remote unavailable after {attempts} attempts: {url}")]
    RemoteUnavailable { url: String, attempts: u32 },

    #[error("Malformed response for {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Task failed: {0}")]
    Task(String),
}
