//! Shared fixtures for registry tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use pc_registry::{
    Argon2Config, AppState, OwnerCredentials, PasswordPolicy, PasswordService, RegistrationForm,
    SqliteSubscriberRepository, SubscriptionService,
};
use pc_relay::{
    AsyncDispatcher, Channel, ChannelEvent, ConnectTarget, Connection, ConnectionConfig,
    ConnectionError, ConnectionManager, DispatcherConfig, EventBroadcaster, PublishError, Transport,
};

pub const OWNER_EMAIL: &str = "owner@plancast.test";
pub const OWNER_PASSWORD: &str = "Harbor#Light7";

/// Channel that keeps every emitted event
pub struct RecordingChannel {
    open: AtomicBool,
    emitted: parking_lot::Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), PublishError> {
        if !self.is_open() {
            return Err(PublishError::ChannelClosed);
        }
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// In-process stand-in for the internal Socket.IO server
pub struct LocalTransport {
    reachable: bool,
    attempts: AtomicU32,
    channels: parking_lot::Mutex<Vec<Arc<RecordingChannel>>>,
    // Keeps event streams open so connections are not torn down
    senders: parking_lot::Mutex<Vec<mpsc::Sender<ChannelEvent>>>,
}

impl LocalTransport {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    fn build(reachable: bool) -> Self {
        Self {
            reachable,
            attempts: AtomicU32::new(0),
            channels: parking_lot::Mutex::new(Vec::new()),
            senders: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.channels
            .lock()
            .iter()
            .flat_map(|channel| channel.emitted.lock().clone())
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, _target: &ConnectTarget) -> Result<Connection, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }

        let channel = Arc::new(RecordingChannel {
            open: AtomicBool::new(true),
            emitted: parking_lot::Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(8);
        self.channels.lock().push(channel.clone());
        self.senders.lock().push(tx);

        Ok(Connection {
            channel,
            events: rx,
        })
    }
}

/// Fully wired registry over an in-memory database
pub struct TestRegistry {
    pub service: Arc<SubscriptionService>,
    pub dispatcher: AsyncDispatcher,
    pub connection: Arc<ConnectionManager>,
    pub transport: Arc<LocalTransport>,
}

impl TestRegistry {
    pub async fn new(transport: Arc<LocalTransport>) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repository = SqliteSubscriberRepository::new(pool);
        repository.init_schema().await.unwrap();

        let config = ConnectionConfig {
            reconnect_attempts: 3,
            // Long enough that no background retry runs during a test
            reconnect_delay: Duration::from_secs(60),
            reconnect_delay_max: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            ..ConnectionConfig::new("http://127.0.0.1:5000", "/internal", "s3cret")
        };
        let connection = ConnectionManager::new(config, transport.clone());
        let broadcaster = EventBroadcaster::new(connection.clone());
        let dispatcher = AsyncDispatcher::start(
            DispatcherConfig {
                workers: 2,
                queue_capacity: 16,
                ..Default::default()
            },
            Arc::new(broadcaster),
        );

        let service = SubscriptionService::new(
            Arc::new(repository),
            Arc::new(PasswordService::new(Argon2Config::testing()).unwrap()),
            PasswordPolicy::default(),
            dispatcher.clone(),
        );

        Self {
            service: Arc::new(service),
            dispatcher,
            connection,
            transport,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            subscriptions: self.service.clone(),
            connection: self.connection.clone(),
            dispatcher: self.dispatcher.clone(),
            owner: OwnerCredentials::new(OWNER_EMAIL, OWNER_PASSWORD),
        }
    }
}

pub fn personal_form(email: &str) -> RegistrationForm {
    RegistrationForm {
        account_type: Some("personal".to_string()),
        first_name: Some("Grace".to_string()),
        last_name: Some("Hopper".to_string()),
        email: Some(email.to_string()),
        telephone: Some("555-0100".to_string()),
        address: Some("Arlington".to_string()),
        organization_name: None,
        password: Some("Cobol#1959".to_string()),
    }
}

pub fn organization_form(email: &str, organization: &str) -> RegistrationForm {
    RegistrationForm {
        account_type: Some("organization".to_string()),
        organization_name: Some(organization.to_string()),
        ..personal_form(email)
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
