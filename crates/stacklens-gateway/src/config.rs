// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;

use stacklens_core::Namespaces;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// PostgreSQL connection URL (document store)
    pub database_url: String,
    /// Redis URL (dedup caches and message bus)
    pub redis_url: String,
    /// Base URL of the orchestrator status API
    pub orchestrator_url: String,
    /// Settings shared with request handlers
    pub settings: Settings,
    /// Path of the skopeo binary used for registry inspection
    pub skopeo_bin: String,
    /// Emit JSON logs
    pub log_json: bool,
}

/// Settings consulted while handling requests.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Seconds a dedup cache record may be reused
    pub cache_expiration: u64,
    /// Upper bound of `per_page`
    pub page_size_max: u32,
    /// `per_page` when the client does not set one
    pub page_size_default: u32,
    /// Shared secret unlocking protected request fields
    pub api_token: Option<String>,
    /// Orchestrator namespaces
    pub namespaces: Namespaces,
    /// Prefix of message bus topics
    pub topic_prefix: String,
    /// Package indexes provenance checks accept
    pub package_indexes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_expiration: 10_800,
            page_size_max: 100,
            page_size_default: 25,
            api_token: None,
            namespaces: Namespaces::default(),
            topic_prefix: "stacklens".to_string(),
            package_indexes: vec!["https://pypi.org/simple".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `STACKLENS_DATABASE_URL`: PostgreSQL connection string
    /// - `STACKLENS_ORCHESTRATOR_URL`: orchestrator API base URL
    ///
    /// Optional (with defaults):
    /// - `STACKLENS_BIND_ADDR` (default: 0.0.0.0:8080)
    /// - `STACKLENS_REDIS_URL` (default: redis://127.0.0.1:6379)
    /// - `STACKLENS_CACHE_EXPIRATION` seconds (default: 10800)
    /// - `STACKLENS_PAGE_SIZE_MAX` (default: 100)
    /// - `STACKLENS_PAGE_SIZE_DEFAULT` (default: 25, capped at the max)
    /// - `STACKLENS_API_TOKEN` (default: unset)
    /// - `STACKLENS_MIDDLETIER_NAMESPACE` (default: stacklens-middletier)
    /// - `STACKLENS_BACKEND_NAMESPACE` (default: stacklens-backend)
    /// - `STACKLENS_TOPIC_PREFIX` (default: stacklens)
    /// - `STACKLENS_PACKAGE_INDEXES` comma separated (default: https://pypi.org/simple)
    /// - `STACKLENS_SKOPEO_BIN` (default: skopeo)
    /// - `STACKLENS_LOG_JSON` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("STACKLENS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("STACKLENS_DATABASE_URL"))?;

        let orchestrator_url = std::env::var("STACKLENS_ORCHESTRATOR_URL")
            .map_err(|_| ConfigError::Missing("STACKLENS_ORCHESTRATOR_URL"))?;

        let bind_addr: SocketAddr = std::env::var("STACKLENS_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("STACKLENS_BIND_ADDR", "must be a socket address"))?;

        let redis_url = std::env::var("STACKLENS_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let cache_expiration: u64 = std::env::var("STACKLENS_CACHE_EXPIRATION")
            .unwrap_or_else(|_| "10800".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STACKLENS_CACHE_EXPIRATION", "must be a number of seconds")
            })?;

        let page_size_max: u32 = std::env::var("STACKLENS_PAGE_SIZE_MAX")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ConfigError::Invalid(
                "STACKLENS_PAGE_SIZE_MAX",
                "must be a positive integer",
            ))?;

        let page_size_default: u32 = std::env::var("STACKLENS_PAGE_SIZE_DEFAULT")
            .unwrap_or_else(|_| "25".to_string())
            .parse()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ConfigError::Invalid(
                "STACKLENS_PAGE_SIZE_DEFAULT",
                "must be a positive integer",
            ))?;

        let api_token = std::env::var("STACKLENS_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let namespaces = Namespaces {
            middletier: std::env::var("STACKLENS_MIDDLETIER_NAMESPACE")
                .unwrap_or_else(|_| "stacklens-middletier".to_string()),
            backend: std::env::var("STACKLENS_BACKEND_NAMESPACE")
                .unwrap_or_else(|_| "stacklens-backend".to_string()),
        };

        let topic_prefix =
            std::env::var("STACKLENS_TOPIC_PREFIX").unwrap_or_else(|_| "stacklens".to_string());

        let package_indexes: Vec<String> = std::env::var("STACKLENS_PACKAGE_INDEXES")
            .unwrap_or_else(|_| "https://pypi.org/simple".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let skopeo_bin =
            std::env::var("STACKLENS_SKOPEO_BIN").unwrap_or_else(|_| "skopeo".to_string());

        let log_json = std::env::var("STACKLENS_LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            orchestrator_url,
            settings: Settings {
                cache_expiration,
                page_size_max,
                page_size_default: page_size_default.min(page_size_max),
                api_token,
                namespaces,
                topic_prefix,
                package_indexes,
            },
            skopeo_bin,
            log_json,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
