//! Error types for the relay

use std::time::Duration;
use thiserror::Error;

/// Wire codec failures
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type: {0:?}")]
    UnknownType(char),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Binary packets are not supported")]
    BinaryUnsupported,

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transient failures establishing the event channel. Retried internally.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Namespace {namespace} rejected the connection: {reason}")]
    Rejected { namespace: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectionError::Transport(e.to_string())
    }
}

/// Failures sending a single event. The event is dropped, never retried.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}
