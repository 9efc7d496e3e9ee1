//! Plancast Server
//!
//! Subscriber registration and plan purchases over HTTP. Every committed
//! purchase is broadcast as `subscriber_created` on the internal Socket.IO
//! namespace.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PLANCAST_CONFIG` | - | Path to a TOML config file |
//! | `PLANCAST_HTTP_PORT` | `8080` | HTTP API port |
//! | `PLANCAST_DATABASE_URL` | `sqlite://subscribers.db?mode=rwc` | SQLite database URL |
//! | `SOCKETIO_URL` / `PLANCAST_RELAY_URL` | `http://app:5000` | Socket.IO server base URL |
//! | `INTERNAL_SOCKET_SECRET` / `PLANCAST_RELAY_SECRET` | - | Namespace handshake secret (required) |
//! | `PLANCAST_RELAY_INCLUDE_CREDENTIAL` | `true` | Forward the plaintext credential in events |
//! | `OWNER_EMAIL` / `PLANCAST_OWNER_EMAIL` | - | Owner account for `/api/subscribers` and `/api/stats` |
//! | `OWNER_PASSWORD` / `PLANCAST_OWNER_PASSWORD` | - | Owner password |
//! | `LOG_FORMAT` | `text` | `json` for structured logs |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use pc_config::{AppConfig, ConfigLoader};
use pc_registry::{
    subscribers_router, AppState, Argon2Config, OwnerCredentials, PasswordPolicy,
    PasswordService, SqliteSubscriberRepository, SubscriptionService,
};
use pc_relay::{
    AsyncDispatcher, ConnectionConfig, ConnectionManager, DispatcherConfig, EventBroadcaster,
    WebSocketTransport,
};

fn connection_config(config: &AppConfig) -> ConnectionConfig {
    let relay = &config.relay;
    ConnectionConfig {
        connect_timeout: Duration::from_millis(relay.connect_timeout_ms),
        reconnect_attempts: relay.reconnect_attempts,
        reconnect_delay: Duration::from_millis(relay.reconnect_delay_ms),
        reconnect_delay_max: Duration::from_millis(relay.reconnect_delay_max_ms),
        ..ConnectionConfig::new(relay.url.clone(), &relay.namespace, relay.secret.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    pc_common::logging::init_logging("pc-server");

    info!("Starting Plancast Server");

    let config = ConfigLoader::new().load()?;
    config.validate()?;

    // Persistence
    info!(url = %config.database.url, "Opening subscriber database");
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repository = SqliteSubscriberRepository::new(pool);
    repository.init_schema().await?;

    // Internal event channel
    let manager = ConnectionManager::new(connection_config(&config), Arc::new(WebSocketTransport::new()));
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if !manager.connect().await {
                warn!("Event channel not reachable at startup; will connect on first purchase");
            }
        });
    }

    let broadcaster = EventBroadcaster::new(manager.clone())
        .with_credential_forwarding(config.relay.include_credential);
    if !config.relay.include_credential {
        info!("Credential forwarding disabled; events carry an empty password");
    }

    let dispatcher = AsyncDispatcher::start(
        DispatcherConfig {
            workers: config.dispatcher.workers,
            queue_capacity: config.dispatcher.queue_capacity,
            event_name: config.relay.event_name.clone(),
        },
        Arc::new(broadcaster),
    );

    // Registry
    let passwords = PasswordService::new(Argon2Config {
        memory_cost: config.password.memory_cost,
        time_cost: config.password.time_cost,
        parallelism: config.password.parallelism,
    })?;
    let subscriptions = SubscriptionService::new(
        Arc::new(repository),
        Arc::new(passwords),
        PasswordPolicy {
            min_length: config.password.min_length,
        },
        dispatcher.clone(),
    );

    let owner = if config.owner.is_configured() {
        OwnerCredentials::new(config.owner.email.clone(), config.owner.password.clone())
    } else {
        warn!("No owner account configured; subscriber list and statistics are closed");
        OwnerCredentials::disabled()
    };

    let app = subscribers_router(AppState {
        subscriptions: Arc::new(subscriptions),
        connection: manager.clone(),
        dispatcher: dispatcher.clone(),
        owner,
    })
    .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received...");
    dispatcher.shutdown();
    manager.shutdown().await;

    info!(stats = ?dispatcher.stats(), "Plancast Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
