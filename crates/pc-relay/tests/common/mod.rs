//! Shared test doubles for the relay
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use pc_common::{AccountType, PlanAssignment, SubscriberSnapshot, SubscriptionPlan};
use pc_relay::{
    Channel, ChannelEvent, ConnectTarget, Connection, ConnectionConfig, ConnectionError,
    PublishError, Transport,
};

/// Channel that records emitted events, optionally blocking each emit on a gate
pub struct MockChannel {
    open: AtomicBool,
    emitted: parking_lot::Mutex<Vec<(String, Value)>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockChannel {
    fn new(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            open: AtomicBool::new(true),
            emitted: parking_lot::Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), PublishError> {
        if !self.is_open() {
            return Err(PublishError::ChannelClosed);
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| PublishError::ChannelClosed)?.forget();
        }
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.mark_closed();
    }
}

/// Transport that counts attempts and can be switched between failing and healthy
pub struct MockTransport {
    attempts: AtomicU32,
    failing: AtomicBool,
    connect_delay: parking_lot::Mutex<Duration>,
    emit_gate: Option<Arc<Semaphore>>,
    channels: parking_lot::Mutex<Vec<Arc<MockChannel>>>,
    event_senders: parking_lot::Mutex<Vec<mpsc::Sender<ChannelEvent>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false, None))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::build(true, None))
    }

    /// Healthy transport whose channels block every emit until `gate` has a permit
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(false, Some(gate)))
    }

    fn build(failing: bool, emit_gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            failing: AtomicBool::new(failing),
            connect_delay: parking_lot::Mutex::new(Duration::ZERO),
            emit_gate,
            channels: parking_lot::Mutex::new(Vec::new()),
            event_senders: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.channels.lock().len()
    }

    /// Every event emitted on any channel, oldest first
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.channels
            .lock()
            .iter()
            .flat_map(|channel| channel.emitted())
            .collect()
    }

    /// Simulate the server dropping the latest connection
    pub async fn drop_connection(&self, reason: &str) {
        if let Some(channel) = self.channels.lock().last() {
            channel.mark_closed();
        }
        let sender = self.event_senders.lock().last().cloned();
        if let Some(sender) = sender {
            let _ = sender
                .send(ChannelEvent::Disconnected {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Deliver an inbound event on the latest connection
    pub async fn deliver(&self, event: ChannelEvent) {
        let sender = self.event_senders.lock().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _target: &ConnectTarget) -> Result<Connection, ConnectionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }

        let channel = Arc::new(MockChannel::new(self.emit_gate.clone()));
        let (tx, rx) = mpsc::channel(16);
        let _ = tx.try_send(ChannelEvent::Connected {
            sid: Some(format!("sid-{}", attempt)),
        });

        self.channels.lock().push(channel.clone());
        self.event_senders.lock().push(tx);

        Ok(Connection {
            channel,
            events: rx,
        })
    }
}

pub fn test_config(reconnect_attempts: u32, reconnect_delay: Duration) -> ConnectionConfig {
    ConnectionConfig {
        reconnect_attempts,
        reconnect_delay,
        reconnect_delay_max: reconnect_delay * 2,
        connect_timeout: Duration::from_secs(2),
        ..ConnectionConfig::new("http://127.0.0.1:5000", "/internal", "s3cret")
    }
}

pub fn create_test_snapshot(id: i64, plan: SubscriptionPlan) -> SubscriberSnapshot {
    SubscriberSnapshot {
        id,
        account_type: AccountType::Organization,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: format!("ada{}@example.com", id),
        telephone: "555-0199".to_string(),
        address: "12 St James's Square".to_string(),
        organization_name: Some("Analytical Engines".to_string()),
        plan: PlanAssignment::for_plan(plan),
        created_at: Utc.with_ymd_and_hms(2024, 5, 4, 9, 0, 0).unwrap(),
        credential: Some("Secret1!".to_string()),
    }
}

/// Poll `condition` for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
