//! Transport abstraction for the event channel
//!
//! The connection manager only talks to these traits, so the Socket.IO
//! client can be swapped for an in-memory double in tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ConnectionError, PublishError};
use crate::protocol::normalize_namespace;

/// Where and how to connect
#[derive(Clone)]
pub struct ConnectTarget {
    /// Base server URL, e.g. `http://app:5000`
    pub url: String,
    /// Normalized namespace, e.g. `/internal`
    pub namespace: String,
    /// Auth payload sent with the namespace connect
    pub auth: Value,
}

impl ConnectTarget {
    pub fn new(url: impl Into<String>, namespace: &str, secret: &str) -> Self {
        Self {
            url: url.into(),
            namespace: normalize_namespace(namespace),
            auth: json!({ "secret": secret }),
        }
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("auth", &"<redacted>")
            .finish()
    }
}

/// Inbound notifications from an open channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Namespace handshake accepted
    Connected { sid: Option<String> },
    /// Named event from the server, e.g. `ack`
    Event { name: String, data: Option<Value> },
    /// Channel is gone. Always the last event on the stream.
    Disconnected { reason: String },
}

/// An established, authenticated channel
#[async_trait]
pub trait Channel: Send + Sync {
    /// Emit `payload` under `event` on the connected namespace
    async fn emit(&self, event: &str, payload: Value) -> Result<(), PublishError>;

    fn is_open(&self) -> bool;

    /// Leave the namespace and close the transport
    async fn close(&self);
}

/// Result of a successful connect: the channel plus its inbound event stream
pub struct Connection {
    pub channel: Arc<dyn Channel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the event consumer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and complete the namespace handshake.
    ///
    /// Returns only once the namespace accepted the auth payload.
    async fn connect(&self, target: &ConnectTarget) -> Result<Connection, ConnectionError>;
}
