//! Socket.IO client over a plain WebSocket transport
//!
//! Long-polling and transport upgrades are not used: the client opens the
//! Engine.IO WebSocket directly, so one text frame carries one packet.

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, PublishError};
use crate::protocol::{EnginePacket, SocketPacket, SocketPacketKind, ENGINE_IO_VERSION};
use crate::transport::{Channel, ChannelEvent, ConnectTarget, Connection, Transport};

/// Outbound frames buffered ahead of the socket writer
const OUTBOUND_BUFFER: usize = 256;

/// Build the Engine.IO WebSocket endpoint from a base server URL.
///
/// `http://app:5000` becomes `ws://app:5000/socket.io/?EIO=4&transport=websocket`.
pub fn engine_io_url(base: &str) -> Result<String, ConnectionError> {
    let base = base.trim().trim_end_matches('/');
    let rest = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ConnectionError::InvalidUrl(base.to_string()));
    };

    Ok(format!(
        "{}/socket.io/?EIO={}&transport=websocket",
        rest, ENGINE_IO_VERSION
    ))
}

/// Socket.IO v5 client transport
pub struct WebSocketTransport {
    event_buffer: usize,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self { event_buffer: 64 }
    }

    /// Capacity of the inbound event stream handed to the connection manager
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Connection, ConnectionError> {
        let url = engine_io_url(&target.url)?;
        debug!(url = %url, namespace = %target.namespace, "Opening event channel");

        let (socket, _response) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let handshake = match next_packet(&mut stream).await? {
            EnginePacket::Open(handshake) => handshake,
            other => {
                return Err(ConnectionError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        };
        trace!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO session opened");

        let connect = SocketPacket::connect(&target.namespace, Some(target.auth.clone()));
        sink.send(text_frame(EnginePacket::Message(connect.encode())))
            .await?;

        let sid = loop {
            match next_packet(&mut stream).await? {
                EnginePacket::Ping(data) => {
                    sink.send(text_frame(EnginePacket::Pong(data))).await?;
                }
                EnginePacket::Message(body) => {
                    let packet = SocketPacket::decode(&body)?;
                    if packet.namespace != target.namespace {
                        continue;
                    }
                    match packet.kind {
                        SocketPacketKind::Connect => {
                            break packet
                                .data
                                .as_ref()
                                .and_then(|d| d.get("sid"))
                                .and_then(Value::as_str)
                                .map(str::to_string);
                        }
                        SocketPacketKind::ConnectError => {
                            return Err(ConnectionError::Rejected {
                                namespace: target.namespace.clone(),
                                reason: packet.error_message(),
                            });
                        }
                        _ => continue,
                    }
                }
                EnginePacket::Close => {
                    return Err(ConnectionError::Handshake(
                        "server closed the session during the handshake".to_string(),
                    ))
                }
                _ => continue,
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let open = Arc::new(AtomicBool::new(true));

        let _ = events_tx.try_send(ChannelEvent::Connected { sid });

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "Event channel writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // The server must ping within interval + timeout or the session is dead
        let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        tokio::spawn(read_loop(
            stream,
            outbound_tx.clone(),
            events_tx,
            open.clone(),
            target.namespace.clone(),
            liveness,
        ));

        Ok(Connection {
            channel: Arc::new(WebSocketChannel {
                namespace: target.namespace.clone(),
                outbound: outbound_tx,
                open,
            }),
            events: events_rx,
        })
    }
}

fn text_frame(packet: EnginePacket) -> Message {
    Message::Text(packet.encode().into())
}

/// Next Engine.IO packet during the handshake
async fn next_packet<S>(stream: &mut S) -> Result<EnginePacket, ConnectionError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => return Ok(EnginePacket::decode(text.as_str())?),
            Message::Close(_) => {
                return Err(ConnectionError::Handshake(
                    "server closed the connection".to_string(),
                ))
            }
            _ => continue,
        }
    }
    Err(ConnectionError::Handshake("connection ended before the handshake completed".to_string()))
}

async fn read_loop<S>(
    mut stream: S,
    outbound: mpsc::Sender<Message>,
    events: mpsc::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
    namespace: String,
    liveness: Duration,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let reason = loop {
        let frame = match tokio::time::timeout(liveness, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => break format!("transport error: {}", e),
            Ok(None) => break "transport closed".to_string(),
            Err(_) => break "ping timeout".to_string(),
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break "server closed the connection".to_string(),
            _ => continue,
        };

        match EnginePacket::decode(text.as_str()) {
            Ok(EnginePacket::Ping(data)) => {
                if outbound.send(text_frame(EnginePacket::Pong(data))).await.is_err() {
                    break "writer stopped".to_string();
                }
            }
            Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                Ok(packet) if packet.namespace == namespace => match packet.kind {
                    SocketPacketKind::Disconnect => {
                        break "namespace disconnected by server".to_string()
                    }
                    SocketPacketKind::Event => {
                        if let Some((name, data)) = packet.event_parts() {
                            let event = ChannelEvent::Event {
                                name: name.to_string(),
                                data: data.cloned(),
                            };
                            if events.send(event).await.is_err() {
                                break "event listener dropped".to_string();
                            }
                        }
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Ignoring undecodable Socket.IO packet"),
            },
            Ok(EnginePacket::Close) => break "server closed the session".to_string(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Ignoring undecodable Engine.IO packet"),
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(ChannelEvent::Disconnected { reason }).await;
}

struct WebSocketChannel {
    namespace: String,
    outbound: mpsc::Sender<Message>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), PublishError> {
        if !self.is_open() {
            return Err(PublishError::ChannelClosed);
        }
        let packet = SocketPacket::event(&self.namespace, event, payload);
        self.outbound
            .send(text_frame(EnginePacket::Message(packet.encode())))
            .await
            .map_err(|_| PublishError::ChannelClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let leave = SocketPacket::disconnect(&self.namespace);
        let _ = self
            .outbound
            .send(text_frame(EnginePacket::Message(leave.encode())))
            .await;
        let _ = self.outbound.send(Message::Close(None)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_io_url_schemes() {
        assert_eq!(
            engine_io_url("http://app:5000").unwrap(),
            "ws://app:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_io_url("https://events.example.com/").unwrap(),
            "wss://events.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_io_url("ws://127.0.0.1:9000").unwrap(),
            "ws://127.0.0.1:9000/socket.io/?EIO=4&transport=websocket"
        );
        assert!(matches!(
            engine_io_url("app:5000"),
            Err(ConnectionError::InvalidUrl(_))
        ));
    }
}
