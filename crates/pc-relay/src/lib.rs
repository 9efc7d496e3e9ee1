//! Plancast Relay
//!
//! Internal event channel for plan purchases:
//! - `protocol`: Engine.IO v4 / Socket.IO v5 packet codec
//! - `transport` / `websocket`: channel abstraction and its WebSocket client
//! - `connection`: single process-wide channel with bounded reconnects
//! - `broadcaster`: `subscriber_created` payload and publisher
//! - `dispatcher`: fire-and-forget worker pool in front of the publisher

pub mod broadcaster;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use broadcaster::{EventBroadcaster, EventPublisher, PublishOutcome, SubscriberCreated, SUBSCRIBER_CREATED};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus};
pub use dispatcher::{AsyncDispatcher, DispatcherConfig, DispatcherStats, SubmitOutcome};
pub use error::{CodecError, ConnectionError, PublishError};
pub use transport::{Channel, ChannelEvent, ConnectTarget, Connection, Transport};
pub use websocket::WebSocketTransport;
