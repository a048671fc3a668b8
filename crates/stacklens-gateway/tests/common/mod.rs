// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory gateway for HTTP-level tests.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use stacklens_core::clock::ManualClock;
use stacklens_core::orchestrator::MockOrchestrator;
use stacklens_core::publisher::RecordingPublisher;
use stacklens_core::store::MemoryDocumentStore;
use stacklens_gateway::callback::RecordingNotifier;
use stacklens_gateway::handlers::{CacheStores, Collaborators};
use stacklens_gateway::image::StaticInspector;
use stacklens_gateway::server::router;
use stacklens_gateway::{GatewayState, Settings};

pub const TOKEN: &str = "s3cret";
pub const PUBLIC_IMAGE: &str = "quay.io/stacklens/app:1.0";
pub const PUBLIC_ALIAS: &str = "quay.io/stacklens/app:latest";
pub const PUBLIC_DIGEST: &str = "sha256:aaaa";
pub const PRIVATE_IMAGE: &str = "registry.example.com/team/private:2";
pub const PRIVATE_DIGEST: &str = "sha256:bbbb";

/// A gateway wired to in-memory collaborators.
pub struct TestGateway {
    pub publisher: Arc<RecordingPublisher>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub documents: Arc<MemoryDocumentStore>,
    pub inspector: Arc<StaticInspector>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub state: Arc<GatewayState>,
    pub router: Router,
}

/// A collected response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_settings(Settings {
            api_token: Some(TOKEN.to_string()),
            topic_prefix: "test".to_string(),
            ..Settings::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        let publisher = Arc::new(RecordingPublisher::new());
        let orchestrator = Arc::new(MockOrchestrator::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let inspector = Arc::new(
            StaticInspector::new()
                .with_image(PUBLIC_IMAGE, PUBLIC_DIGEST)
                .with_image(PUBLIC_ALIAS, PUBLIC_DIGEST)
                .with_image(PRIVATE_IMAGE, PRIVATE_DIGEST)
                .with_credentials(PRIVATE_IMAGE, "robot", "hunter2"),
        );
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));

        let collaborators = Collaborators::new(
            publisher.clone(),
            orchestrator.clone(),
            documents.clone(),
            inspector.clone(),
            notifier.clone(),
        )
        .with_clock(clock.clone());

        let state = Arc::new(GatewayState::new(
            collaborators,
            CacheStores::in_memory(),
            settings,
        ));
        let router = router(state.clone());

        Self {
            publisher,
            orchestrator,
            documents,
            inspector,
            notifier,
            clock,
            state,
            router,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub fn published(&self) -> usize {
        self.publisher.messages().len()
    }
}
