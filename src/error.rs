//! Error types for the RPC client

use thiserror::Error;

/// Main error type for RPC client operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// No socket in the probe range accepted a connection
    #[error("could not connect to the local RPC endpoint")]
    ConnectionRefused,

    #[error("connection timed out")]
    ConnectionTimeout,

    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed wire data (bad opcode, oversized frame, invalid payload JSON)
    #[error("decode failed: {message}")]
    Decode { message: String },

    /// The peer answered a specific request with an error payload
    #[error("RPC error {code}: {message}")]
    Protocol { code: u64, message: String },

    #[error("could not find the local HTTP endpoint")]
    EndpointNotFound,

    #[error("'{field}' must fit into a unix timestamp")]
    TimestampTooLarge { field: &'static str },

    /// Invalid construction-time options, raised before any I/O
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("client is not connected")]
    NotConnected,

    /// The not-ready request queue is at capacity
    #[error("request queue is full ({limit} requests deferred)")]
    RequestQueueFull { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for RPC client operations
pub type Result<T> = std::result::Result<T, RpcError>;
