//! Connection lifecycle for the internal event channel
//!
//! One `ConnectionManager` owns the process-wide channel. It connects on
//! demand, reconnects in the background after a drop, and gives up (Backoff)
//! after a bounded run of consecutive failures. Publishers only ever see
//! "connected" or "not connected"; connection errors never leave this module.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::protocol::normalize_namespace;
use crate::transport::{Channel, ChannelEvent, ConnectTarget, Connection, Transport};

/// Connection settings
#[derive(Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub namespace: String,
    pub secret: String,
    /// Upper bound for a single connect attempt, handshake included
    pub connect_timeout: Duration,
    /// Consecutive failures before entering Backoff
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "http://app:5000".to_string(),
            namespace: "/internal".to_string(),
            secret: String::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("secret", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("reconnect_delay_max", &self.reconnect_delay_max)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, namespace: &str, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: normalize_namespace(namespace),
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Doubles from `reconnect_delay` and saturates at `reconnect_delay_max`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.reconnect_delay_max)
    }

    fn target(&self) -> ConnectTarget {
        ConnectTarget::new(self.url.clone(), &self.namespace, &self.secret)
    }
}

/// Lifecycle state of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry bound exhausted; only an on-demand connect tries again
    Backoff,
}

/// Observable connection status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last success or drop
    pub retries: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retries: 0,
            last_error: None,
        }
    }
}

/// Owner of the single process-wide event channel
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    status_tx: watch::Sender<ConnectionStatus>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    /// Serializes physical connect attempts
    connect_lock: Mutex<()>,
    /// Bumped after every finished attempt so waiters can adopt its outcome
    completed_attempts: AtomicU64,
    /// Identifies the installed channel; stale disconnects are ignored
    generation: AtomicU64,
    reconnecting: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Arc::new(Self {
            config,
            transport,
            status_tx,
            channel: RwLock::new(None),
            connect_lock: Mutex::new(()),
            completed_attempts: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Non-blocking connectivity check
    pub fn is_connected(&self) -> bool {
        self.status_tx.borrow().state == ConnectionState::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// The open channel, if connected
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.read().clone()
    }

    /// Connect if not already connected.
    ///
    /// Idempotent while connected. Concurrent callers share one physical
    /// attempt and all observe its outcome. A failed attempt counts toward
    /// the retry bound and hands over to the background reconnect loop.
    pub async fn connect(self: &Arc<Self>) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let seen = self.completed_attempts.load(Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        if self.is_connected() {
            return true;
        }
        if self.completed_attempts.load(Ordering::SeqCst) != seen {
            // An attempt finished while we waited and it did not connect
            return false;
        }

        let connected = self.attempt().await;
        if !connected && self.status().state != ConnectionState::Backoff {
            self.schedule_reconnect();
        }
        connected
    }

    /// Close the channel and stop reconnecting
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let channel = self.channel.write().take();
        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
        });
        if let Some(channel) = channel {
            channel.close().await;
        }
        info!(url = %self.config.url, "Event channel closed");
    }

    /// One physical attempt. Caller holds `connect_lock`.
    async fn attempt(self: &Arc<Self>) -> bool {
        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
        });

        let target = self.config.target();
        let outcome = match tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(self.config.connect_timeout)),
        };

        let connected = match outcome {
            Ok(connection) => self.install(connection).await,
            Err(e) => {
                self.record_failure(&e);
                false
            }
        };

        self.completed_attempts.fetch_add(1, Ordering::SeqCst);
        connected
    }

    async fn install(self: &Arc<Self>, connection: Connection) -> bool {
        let Connection { channel, events } = connection;

        if self.closed.load(Ordering::SeqCst) {
            channel.close().await;
            return false;
        }

        let generation = {
            let mut slot = self.channel.write();
            *slot = Some(channel);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.status_tx.send_modify(|status| {
                status.state = ConnectionState::Connected;
                status.retries = 0;
                status.last_error = None;
            });
            generation
        };

        info!(
            url = %self.config.url,
            namespace = %self.config.namespace,
            generation,
            "Connected to event channel"
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.listen(generation, events).await;
        });
        true
    }

    fn record_failure(&self, error: &ConnectionError) {
        let bound = self.config.reconnect_attempts;
        let mut retries = 0;
        self.status_tx.send_modify(|status| {
            status.retries = status.retries.saturating_add(1);
            status.last_error = Some(error.to_string());
            status.state = if status.retries >= bound {
                ConnectionState::Backoff
            } else {
                ConnectionState::Disconnected
            };
            retries = status.retries;
        });

        if retries >= bound {
            warn!(
                url = %self.config.url,
                attempts = retries,
                error = %error,
                "Event channel unreachable; reconnect attempts exhausted"
            );
        } else {
            warn!(
                url = %self.config.url,
                attempt = retries,
                max_attempts = bound,
                error = %error,
                "Failed to connect to event channel"
            );
        }
    }

    /// Logs inbound traffic until the channel goes away
    async fn listen(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<ChannelEvent>) {
        let mut reason = "event stream ended".to_string();

        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Connected { sid } => {
                    info!(sid = ?sid, namespace = %self.config.namespace, "Joined event namespace");
                }
                ChannelEvent::Event { name, data } if name == "ack" => {
                    info!(payload = ?data, "Event consumer acknowledged");
                }
                ChannelEvent::Event { name, .. } => {
                    debug!(event = %name, "Ignoring inbound event");
                }
                ChannelEvent::Disconnected { reason: why } => {
                    reason = why;
                    break;
                }
            }
        }

        self.handle_disconnect(generation, &reason);
    }

    fn handle_disconnect(self: &Arc<Self>, generation: u64, reason: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut slot = self.channel.write();
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Ignoring disconnect from a replaced channel");
                return;
            }
            *slot = None;
            self.status_tx.send_modify(|status| {
                status.state = ConnectionState::Disconnected;
                status.retries = 0;
                status.last_error = Some(reason.to_string());
            });
        }

        warn!(reason, "Disconnected from event channel; reconnecting in the background");
        self.schedule_reconnect();
    }

    /// Start the background loop unless one is already running
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.reconnect_loop().await;
            manager.reconnecting.store(false, Ordering::SeqCst);

            // A drop may have landed between the loop exiting and the flag clearing
            if manager.status().state == ConnectionState::Disconnected
                && !manager.closed.load(Ordering::SeqCst)
            {
                manager.schedule_reconnect();
            }
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            let status = self.status();
            match status.state {
                ConnectionState::Connected | ConnectionState::Backoff => return,
                _ => {}
            }

            let delay = self.config.backoff_delay(status.retries.max(1));
            debug!(delay_ms = delay.as_millis() as u64, retries = status.retries, "Scheduling reconnect");
            tokio::time::sleep(delay).await;

            let _guard = self.connect_lock.lock().await;
            if self.is_connected() || self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.status().state == ConnectionState::Backoff {
                return;
            }
            self.attempt().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let config = ConnectionConfig {
            reconnect_delay: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(5000),
            ..Default::default()
        };

        assert_eq!(config.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(5000));
        assert_eq!(config.backoff_delay(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_config_normalizes_namespace_and_redacts_secret() {
        let config = ConnectionConfig::new("http://app:5000", "internal", "hunter2");
        assert_eq!(config.namespace, "/internal");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
