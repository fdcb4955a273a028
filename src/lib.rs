#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;
pub mod workers;

use crate::adapters::database::{DbPool, MessageRepository, UserRepository};
use crate::adapters::memory::{InMemoryIdentityDirectory, InMemoryMessageStore};
use crate::adapters::redis::{RedisClient, RedisRoomTransport};
use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::conversation_service::ConversationService;
use crate::services::delivery_service::DeliveryService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::read_state_service::ReadStateService;
use crate::services::room::{RoomChannel, RoomMembership, RoomRegistry};
use crate::services::store::{IdentityDirectory, MessageStore};
use crate::workers::RoomWorker;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

/// A fully wired application, ready to be served.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
    pub workers: Workers,
}

/// Background tasks that run for the lifetime of the process.
/// They stop when the builder's shutdown channel flips.
#[derive(Debug)]
pub struct Workers {
    room_worker: RoomWorker,
    shutdown_rx: watch::Receiver<bool>,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![tokio::spawn(self.room_worker.run(self.shutdown_rx).instrument(tracing::info_span!("room_worker")))]
    }
}

/// Wires adapters into services.
///
/// Backends that are not supplied fall back to process-local implementations:
/// no pool means an in-memory store, no pub/sub means a loopback room channel.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<DbPool>,
    pubsub: Option<Arc<RedisClient>>,
    store: Option<Arc<dyn MessageStore>>,
    directory: Option<Arc<dyn IdentityDirectory>>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, pool: None, pubsub: None, store: None, directory: None, shutdown_rx: None }
    }

    #[must_use]
    pub fn with_database(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<RedisClient>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Overrides the message store, e.g. with an in-memory one in tests.
    #[must_use]
    pub fn with_message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_identity_directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    #[must_use]
    pub fn with_shutdown_rx(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// # Errors
    /// Returns an error if no shutdown receiver was supplied.
    pub fn build(self) -> anyhow::Result<App> {
        let Some(shutdown_rx) = self.shutdown_rx else {
            anyhow::bail!("AppBuilder requires a shutdown receiver");
        };
        let config = self.config;

        let store: Arc<dyn MessageStore> = match (self.store, &self.pool) {
            (Some(store), _) => store,
            (None, Some(pool)) => Arc::new(MessageRepository::new(pool.clone())),
            (None, None) => {
                tracing::warn!("No database configured, messages are kept in memory");
                Arc::new(InMemoryMessageStore::new())
            }
        };
        let directory: Arc<dyn IdentityDirectory> = match (self.directory, &self.pool) {
            (Some(directory), _) => directory,
            (None, Some(pool)) => Arc::new(UserRepository::new(pool.clone())),
            (None, None) => Arc::new(InMemoryIdentityDirectory::new()),
        };

        let (rooms, remote) = match &self.pubsub {
            Some(pubsub) => {
                let transport = RedisRoomTransport::new(Arc::clone(pubsub), config.pubsub.room_channel_prefix.clone());
                // Subscribe to a room's channel only while this node holds the room.
                let registry = RoomRegistry::new(config.rooms.channel_capacity)
                    .with_membership(Arc::new(transport.clone()) as Arc<dyn RoomMembership>);
                (RoomChannel::new(registry, Arc::new(transport.clone())), Some(transport))
            }
            None => (RoomChannel::local(config.rooms.channel_capacity), None),
        };

        let message_service = MessageService::new(store, directory, config.messaging.clone());
        let read_state_service = ReadStateService::new(message_service.clone(), rooms.clone());
        let conversation_service = ConversationService::new(message_service.clone(), read_state_service.clone());
        let delivery_service = DeliveryService::new(message_service.clone(), rooms.clone(), &config.messaging);
        let gateway_service = GatewayService::new(
            conversation_service.clone(),
            read_state_service.clone(),
            rooms.clone(),
            config.websocket.clone(),
        );
        let rate_limit_service = RateLimitService::new(config.server.trusted_proxies.clone());
        let health_service = HealthService::new(self.pool, self.pubsub, config.health.clone());

        let workers =
            Workers { room_worker: RoomWorker::new(rooms, remote, config.rooms.gc_interval_secs), shutdown_rx };

        Ok(App {
            services: ServiceContainer {
                message_service,
                conversation_service,
                read_state_service,
                delivery_service,
                gateway_service,
                rate_limit_service,
            },
            health_service,
            workers,
        })
    }
}

/// Applies pending migrations.
///
/// # Errors
/// Returns an error if a migration fails.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Flips the shutdown channel on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the configured exporters.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info.location().map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();

        tracing::error!(panic.payload = %payload, panic.location = ?location, "Process panicked");
    }));
}
