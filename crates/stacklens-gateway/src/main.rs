// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stacklens Gateway - User-facing HTTP API
//!
//! An HTTP server responsible for:
//! - Container image analysis requests
//! - Provenance checks and dependency advice for Python stacks
//! - Build analyses and repository initialization
//! - Status, log and result retrieval of dispatched work

use std::sync::Arc;
use tracing::{info, warn};

use stacklens_gateway::config::Config;
use stacklens_gateway::runtime::{GatewayRuntime, connect};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stacklens_gateway=info,stacklens_core=info".into());
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    info!(
        bind_addr = %config.bind_addr,
        orchestrator_url = %config.orchestrator_url,
        cache_expiration = config.settings.cache_expiration,
        authentication = config.settings.api_token.is_some(),
        "Starting Stacklens Gateway"
    );

    let state = connect(&config).await?;

    // Start the runtime
    let runtime = GatewayRuntime::builder()
        .state(Arc::new(state))
        .bind_addr(config.bind_addr)
        .build()?
        .start()
        .await?;

    info!(addr = %config.bind_addr, "Gateway server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Stacklens Gateway shut down");

    Ok(())
}
