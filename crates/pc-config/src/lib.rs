//! Plancast Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub relay: RelayConfig,
    pub dispatcher: DispatcherConfig,
    pub password: PasswordConfig,
    pub owner: OwnerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Subscriber store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://subscribers.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Internal event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the Socket.IO server
    pub url: String,
    /// Namespace the events are emitted on
    pub namespace: String,
    /// Shared secret sent in the namespace handshake
    pub secret: String,
    /// Event name for plan purchases
    pub event_name: String,
    /// Per-attempt connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Consecutive failed attempts before giving up (Backoff)
    pub reconnect_attempts: u32,
    /// Initial delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds
    pub reconnect_delay_max_ms: u64,
    /// Forward the plaintext credential in event payloads
    pub include_credential: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "http://app:5000".to_string(),
            namespace: "/internal".to_string(),
            secret: String::new(),
            event_name: "subscriber_created".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_attempts: 10,
            reconnect_delay_ms: 1_000,
            reconnect_delay_max_ms: 5_000,
            include_credential: true,
        }
    }
}

/// Background dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker tasks publishing events
    pub workers: usize,
    /// Pending submissions held before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Credential hashing and policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub min_length: usize,
    /// Argon2 memory cost in KiB
    pub memory_cost: u32,
    /// Argon2 iterations
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            memory_cost: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Owner account for the subscriber list and statistics.
///
/// Both values empty disables those views.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerConfig {
    pub email: String,
    pub password: String,
}

impl OwnerConfig {
    pub fn is_configured(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for OwnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "relay.secret is not set (PLANCAST_RELAY_SECRET or INTERNAL_SOCKET_SECRET)".to_string(),
            ));
        }
        if self.relay.url.trim().is_empty() {
            return Err(ConfigError::ValidationError("relay.url must not be empty".to_string()));
        }
        if self.relay.reconnect_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "relay.reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if self.relay.reconnect_delay_max_ms < self.relay.reconnect_delay_ms {
            return Err(ConfigError::ValidationError(
                "relay.reconnect_delay_max_ms must not be below relay.reconnect_delay_ms".to_string(),
            ));
        }
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::ValidationError("dispatcher.workers must be at least 1".to_string()));
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.owner.email.trim().is_empty() != self.owner.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "owner.email and owner.password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Plancast Configuration
# Environment variables override these settings

[http]
port = 8080
host = "0.0.0.0"

[database]
url = "sqlite://subscribers.db?mode=rwc"
max_connections = 5

[relay]
url = "http://app:5000"
namespace = "/internal"
secret = ""
event_name = "subscriber_created"
connect_timeout_ms = 10000
reconnect_attempts = 10
reconnect_delay_ms = 1000
reconnect_delay_max_ms = 5000
include_credential = true

[dispatcher]
workers = 4
queue_capacity = 1024

[password]
min_length = 8
memory_cost = 19456
time_cost = 2
parallelism = 1

# Owner views (subscriber list, statistics); leave empty to disable
[owner]
email = ""
password = ""
"#
        .to_string()
    }
}
