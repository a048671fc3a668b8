// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for stacklens-gateway.
//!
//! [`GatewayRuntime`] runs the HTTP gateway inside an existing tokio
//! application. The gateway state is either wired from a [`Config`] with
//! [`connect`] or assembled by hand (tests use in-memory collaborators).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stacklens_gateway::Config;
//! use stacklens_gateway::runtime::{GatewayRuntime, connect};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = connect(&config).await?;
//!
//!     let runtime = GatewayRuntime::builder()
//!         .state(Arc::new(state))
//!         .bind_addr(config.bind_addr)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use stacklens_core::orchestrator::HttpOrchestrator;
use stacklens_core::publisher::RedisStreamPublisher;
use stacklens_core::store::PostgresDocumentStore;

use crate::callback::HttpCallbackNotifier;
use crate::config::Config;
use crate::handlers::{CacheStores, Collaborators, GatewayState};
use crate::image::SkopeoInspector;
use crate::server::run_gateway_server_with_shutdown;

/// Connect to every collaborator named in `config` and wire the gateway state.
pub async fn connect(config: &Config) -> Result<GatewayState> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    info!("Connected to database");

    let documents = PostgresDocumentStore::new(pool);
    documents.ensure_schema().await?;
    info!("Database schema verified");

    let redis = redis::Client::open(config.redis_url.as_str())?;
    let connection = redis::aio::ConnectionManager::new(redis).await?;
    info!("Connected to redis");

    let collaborators = Collaborators::new(
        Arc::new(RedisStreamPublisher::new(connection.clone())),
        Arc::new(HttpOrchestrator::new(&config.orchestrator_url)?),
        Arc::new(documents),
        Arc::new(SkopeoInspector::new(&config.skopeo_bin)),
        Arc::new(HttpCallbackNotifier::new()?),
    );
    let caches = CacheStores::redis(connection, &config.settings.topic_prefix);

    Ok(GatewayState::new(
        collaborators,
        caches,
        config.settings.clone(),
    ))
}

/// Builder for creating a [`GatewayRuntime`].
pub struct GatewayRuntimeBuilder {
    state: Option<Arc<GatewayState>>,
    bind_addr: SocketAddr,
}

impl Default for GatewayRuntimeBuilder {
    fn default() -> Self {
        Self {
            state: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl GatewayRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler state (required).
    pub fn state(mut self, state: Arc<GatewayState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the bind address of the HTTP server.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<GatewayRuntimeConfig> {
        let state = self
            .state
            .ok_or_else(|| anyhow::anyhow!("state is required"))?;

        Ok(GatewayRuntimeConfig {
            state,
            bind_addr: self.bind_addr,
        })
    }
}

/// Configuration for a [`GatewayRuntime`].
pub struct GatewayRuntimeConfig {
    state: Arc<GatewayState>,
    bind_addr: SocketAddr,
}

impl GatewayRuntimeConfig {
    /// Start the runtime, spawning the HTTP server task.
    pub async fn start(self) -> Result<GatewayRuntime> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bind_addr = self.bind_addr;

        let server_handle = tokio::spawn(run_gateway_server_with_shutdown(
            bind_addr,
            self.state.clone(),
            shutdown_rx,
        ));

        info!(
            bind_addr = %bind_addr,
            version = %self.state.version,
            "GatewayRuntime started"
        );

        Ok(GatewayRuntime {
            server_handle,
            shutdown_tx,
            state: self.state,
            bind_addr,
        })
    }
}

/// A running gateway that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct GatewayRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<GatewayState>,
    bind_addr: SocketAddr,
}

impl GatewayRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    /// Get the bind address of the HTTP server.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Whether the server task has exited.
    pub fn is_finished(&self) -> bool {
        self.server_handle.is_finished()
    }

    /// Gracefully shut down the runtime, letting in-flight requests finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("GatewayRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);

        match self.server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Gateway server exited with error"),
            Err(e) => error!(error = %e, "Gateway server task panicked"),
        }

        info!("GatewayRuntime shut down");
        Ok(())
    }
}
