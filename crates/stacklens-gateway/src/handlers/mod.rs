// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway request handlers.
//!
//! Handlers are plain async functions over [`GatewayState`] returning
//! [`ApiResponse`] or [`ApiError`]. Extraction from HTTP requests lives in
//! [`crate::server`].

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Duration;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use stacklens_core::cache::{MemoryCacheStore, RedisCacheStore};
use stacklens_core::clock::{Clock, SystemClock};
use stacklens_core::orchestrator::Orchestrator;
use stacklens_core::publisher::MessagePublisher;
use stacklens_core::store::DocumentStore;
use stacklens_core::{CacheStore, DispatchContext, Dispatcher, Reconciler, ServiceInfo, WorkKind};

use crate::callback::{CallbackNotifier, CallbackRegistry};
use crate::config::Settings;
use crate::error::ApiError;
use crate::image::ImageInspector;

pub mod advice;
pub mod analysis;
pub mod build;
pub mod misc;
pub mod provenance;
pub mod status;

use advice::AdviceRequest;
use analysis::AnalysisRequest;
use build::{BuildLogRequest, BuildRequest, RepoInitRequest};
use provenance::ProvenanceRequest;

/// Name reported as `component_name` in every work message.
pub const COMPONENT_NAME: &str = "stacklens-gateway";

/// Collection mapping image content digests to their analyses.
pub const ANALYSIS_BY_DIGEST_COLLECTION: &str = "analysis-by-digest";

/// Collection holding submitted build logs.
pub const BUILDLOGS_COLLECTION: &str = "buildlogs";

/// Result type of handlers.
pub type HandlerResult = std::result::Result<ApiResponse, ApiError>;

// ============================================================================
// Response
// ============================================================================

/// A JSON response with extra headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: Value,
    /// Extra response headers.
    pub headers: Vec<(&'static str, String)>,
}

impl ApiResponse {
    /// Response with `status` and `body`.
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    /// 200 OK.
    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// 202 Accepted.
    pub fn accepted(body: Value) -> Self {
        Self::new(StatusCode::ACCEPTED, body)
    }

    /// Response with a status reported by the reconciler.
    pub fn with_code(code: u16, body: Value) -> Self {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, body)
    }

    /// Add response headers.
    pub fn with_headers(mut self, headers: Vec<(&'static str, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        for (name, value) in self.headers {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(name), value);
                }
                Err(e) => warn!(header = name, error = %e, "Dropping invalid header value"),
            }
        }
        response
    }
}

// ============================================================================
// State
// ============================================================================

/// Collaborators the gateway talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Message bus.
    pub publisher: Arc<dyn MessagePublisher>,
    /// Orchestrator status API.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Durable document store.
    pub documents: Arc<dyn DocumentStore>,
    /// Registry inspector.
    pub inspector: Arc<dyn ImageInspector>,
    /// Callback delivery.
    pub notifier: Arc<dyn CallbackNotifier>,
    /// Time source for cache freshness.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators using the system clock.
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        orchestrator: Arc<dyn Orchestrator>,
        documents: Arc<dyn DocumentStore>,
        inspector: Arc<dyn ImageInspector>,
        notifier: Arc<dyn CallbackNotifier>,
    ) -> Self {
        Self {
            publisher,
            orchestrator,
            documents,
            inspector,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// One dedup cache per kind of deduplicated work.
#[derive(Clone)]
pub struct CacheStores {
    /// Image analyses, keyed by image digest and parameters.
    pub analyses: Arc<dyn CacheStore>,
    /// Provenance checks.
    pub provenance: Arc<dyn CacheStore>,
    /// Advice.
    pub advisers: Arc<dyn CacheStore>,
    /// Build log parsers, keyed by build log digest.
    pub buildlogs: Arc<dyn CacheStore>,
}

impl CacheStores {
    /// In-process caches.
    pub fn in_memory() -> Self {
        Self {
            analyses: Arc::new(MemoryCacheStore::new()),
            provenance: Arc::new(MemoryCacheStore::new()),
            advisers: Arc::new(MemoryCacheStore::new()),
            buildlogs: Arc::new(MemoryCacheStore::new()),
        }
    }

    /// Redis caches sharing `connection`, keyed under `prefix`.
    pub fn redis(connection: ConnectionManager, prefix: &str) -> Self {
        let store = |namespace: &str| -> Arc<dyn CacheStore> {
            Arc::new(RedisCacheStore::new(connection.clone(), prefix, namespace))
        };
        Self {
            analyses: store("analyses"),
            provenance: store("provenance"),
            advisers: store("advisers"),
            buildlogs: store("buildlogs"),
        }
    }
}

/// Shared state for gateway handlers.
pub struct GatewayState {
    /// Image analysis dispatcher (dedup without expiry).
    pub analysis: Dispatcher<AnalysisRequest>,
    /// Provenance check dispatcher.
    pub provenance: Dispatcher<ProvenanceRequest>,
    /// Advice dispatcher.
    pub advice: Dispatcher<AdviceRequest>,
    /// Build analysis dispatcher.
    pub build: Dispatcher<BuildRequest>,
    /// Build log parser ids, deduplicated by build log digest.
    pub buildlogs: Dispatcher<BuildLogRequest>,
    /// Repository initialization dispatcher.
    pub repo_init: Dispatcher<RepoInitRequest>,
    /// Durable document store.
    pub documents: Arc<dyn DocumentStore>,
    /// Registry inspector.
    pub inspector: Arc<dyn ImageInspector>,
    /// Callback registrations.
    pub callbacks: CallbackRegistry,
    /// Callback delivery.
    pub notifier: Arc<dyn CallbackNotifier>,
    /// Request settings.
    pub settings: Settings,
    /// When the gateway started.
    pub start_time: std::time::Instant,
    /// Gateway version.
    pub version: String,
    reconcilers: HashMap<WorkKind, Reconciler>,
}

impl GatewayState {
    /// Wire dispatchers and reconcilers over `collaborators`.
    pub fn new(collaborators: Collaborators, caches: CacheStores, settings: Settings) -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let context = DispatchContext::new(
            collaborators.publisher.clone(),
            collaborators.orchestrator.clone(),
            collaborators.documents.clone(),
            ServiceInfo {
                service_version: version.clone(),
                component_name: COMPONENT_NAME.to_string(),
            },
            settings.topic_prefix.clone(),
        )
        .with_clock(collaborators.clock.clone());

        // Out-of-range expirations behave as "never expires".
        let ttl = i64::try_from(settings.cache_expiration)
            .ok()
            .and_then(Duration::try_seconds);

        let reconcilers = [
            WorkKind::Analysis,
            WorkKind::Provenance,
            WorkKind::Advice,
            WorkKind::BuildAnalysis,
        ]
        .into_iter()
        .map(|kind| {
            let reconciler = Reconciler::new(
                kind,
                &settings.namespaces,
                collaborators.documents.clone(),
                collaborators.orchestrator.clone(),
            );
            (kind, reconciler)
        })
        .collect();

        Self {
            analysis: Dispatcher::new(context.clone()).with_cache(caches.analyses, None),
            provenance: Dispatcher::new(context.clone()).with_cache(caches.provenance, ttl),
            advice: Dispatcher::new(context.clone()).with_cache(caches.advisers, ttl),
            build: Dispatcher::new(context.clone()),
            buildlogs: Dispatcher::new(context.clone()).with_cache(caches.buildlogs, None),
            repo_init: Dispatcher::new(context),
            documents: collaborators.documents.clone(),
            inspector: collaborators.inspector,
            callbacks: CallbackRegistry::new(collaborators.documents),
            notifier: collaborators.notifier,
            settings,
            start_time: std::time::Instant::now(),
            version,
            reconcilers,
        }
    }

    /// Reconciler for `kind`.
    pub fn reconciler(&self, kind: WorkKind) -> Result<&Reconciler, ApiError> {
        self.reconcilers
            .get(&kind)
            .ok_or_else(|| ApiError::internal("UnsupportedKind"))
    }

    /// Gateway uptime in milliseconds.
    pub fn uptime_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

/// Parameters echoed back for a work-item id.
pub(crate) fn id_parameters(analysis_id: &str) -> Value {
    serde_json::json!({ "analysis_id": analysis_id })
}
