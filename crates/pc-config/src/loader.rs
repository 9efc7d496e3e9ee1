//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "plancast.toml",
    "./config/config.toml",
    "./config/plancast.toml",
    "/etc/plancast/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("PLANCAST_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply overrides from a variable lookup (the process environment in production).
///
/// `INTERNAL_SOCKET_SECRET`, `SOCKETIO_URL`, `OWNER_EMAIL` and
/// `OWNER_PASSWORD` are accepted when the `PLANCAST_` form is absent.
fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let first = |keys: &[&str]| keys.iter().find_map(|&key| lookup(key));

    // HTTP
    if let Some(port) = lookup("PLANCAST_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.http.port = port;
    }
    if let Some(val) = lookup("PLANCAST_HTTP_HOST") {
        config.http.host = val;
    }

    // Database
    if let Some(val) = lookup("PLANCAST_DATABASE_URL") {
        config.database.url = val;
    }
    if let Some(max) = lookup("PLANCAST_DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
        config.database.max_connections = max;
    }

    // Relay
    if let Some(val) = first(&["PLANCAST_RELAY_URL", "SOCKETIO_URL"]) {
        config.relay.url = val;
    }
    if let Some(val) = first(&["PLANCAST_RELAY_SECRET", "INTERNAL_SOCKET_SECRET"]) {
        config.relay.secret = val;
    }
    if let Some(val) = lookup("PLANCAST_RELAY_NAMESPACE") {
        config.relay.namespace = val;
    }
    if let Some(val) = lookup("PLANCAST_RELAY_EVENT_NAME") {
        config.relay.event_name = val;
    }
    if let Some(ms) = lookup("PLANCAST_RELAY_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.relay.connect_timeout_ms = ms;
    }
    if let Some(attempts) = lookup("PLANCAST_RELAY_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.relay.reconnect_attempts = attempts;
    }
    if let Some(ms) = lookup("PLANCAST_RELAY_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.relay.reconnect_delay_ms = ms;
    }
    if let Some(ms) = lookup("PLANCAST_RELAY_RECONNECT_DELAY_MAX_MS").and_then(|v| v.parse().ok()) {
        config.relay.reconnect_delay_max_ms = ms;
    }
    if let Some(val) = lookup("PLANCAST_RELAY_INCLUDE_CREDENTIAL") {
        config.relay.include_credential = val.parse().unwrap_or(true);
    }

    // Dispatcher
    if let Some(workers) = lookup("PLANCAST_DISPATCHER_WORKERS").and_then(|v| v.parse().ok()) {
        config.dispatcher.workers = workers;
    }
    if let Some(capacity) = lookup("PLANCAST_DISPATCHER_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
        config.dispatcher.queue_capacity = capacity;
    }

    // Owner
    if let Some(val) = first(&["PLANCAST_OWNER_EMAIL", "OWNER_EMAIL"]) {
        config.owner.email = val;
    }
    if let Some(val) = first(&["PLANCAST_OWNER_PASSWORD", "OWNER_PASSWORD"]) {
        config.owner.password = val;
    }

    // Password
    if let Some(len) = lookup("PLANCAST_PASSWORD_MIN_LENGTH").and_then(|v| v.parse().ok()) {
        config.password.min_length = len;
    }
}
