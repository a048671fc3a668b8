// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared in-memory collaborators for stacklens-core integration tests.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::Arc;

use stacklens_core::cache::MemoryCacheStore;
use stacklens_core::clock::{Clock, ManualClock};
use stacklens_core::orchestrator::MockOrchestrator;
use stacklens_core::publisher::RecordingPublisher;
use stacklens_core::store::MemoryDocumentStore;
use stacklens_core::{
    DispatchContext, DispatchRequest, Dispatcher, Fingerprint, Namespaces, Reconciler,
    ServiceInfo, WorkKind,
};

/// Default dedup TTL used by the tests (3 hours).
pub fn ttl() -> Duration {
    Duration::seconds(10_800)
}

/// In-memory collaborators wired into a dispatch context.
pub struct Harness {
    pub publisher: Arc<RecordingPublisher>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub documents: Arc<MemoryDocumentStore>,
    pub cache: Arc<MemoryCacheStore>,
    pub clock: Arc<ManualClock>,
    pub context: DispatchContext,
}

impl Harness {
    pub fn new() -> Self {
        let publisher = Arc::new(RecordingPublisher::new());
        let orchestrator = Arc::new(MockOrchestrator::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let cache = Arc::new(MemoryCacheStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));

        let context = DispatchContext::new(
            publisher.clone(),
            orchestrator.clone(),
            documents.clone(),
            ServiceInfo {
                service_version: "0.0.0-test".to_string(),
                component_name: "stacklens-test".to_string(),
            },
            "test",
        )
        .with_clock(clock.clone());

        Self {
            publisher,
            orchestrator,
            documents,
            cache,
            clock,
            context,
        }
    }

    /// Dispatcher deduplicating through the harness cache with the default TTL.
    pub fn dispatcher<R: DispatchRequest>(&self) -> Dispatcher<R> {
        Dispatcher::new(self.context.clone()).with_cache(self.cache.clone(), Some(ttl()))
    }

    /// Dispatcher deduplicating through a cache whose records never expire.
    pub fn untimed_dispatcher<R: DispatchRequest>(&self) -> Dispatcher<R> {
        Dispatcher::new(self.context.clone()).with_cache(self.cache.clone(), None)
    }

    pub fn reconciler(&self, kind: WorkKind) -> Reconciler {
        Reconciler::new(
            kind,
            &Namespaces::default(),
            self.documents.clone(),
            self.orchestrator.clone(),
        )
    }

    /// Current harness time as unix seconds.
    pub fn clock_now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    pub fn published(&self) -> usize {
        self.publisher.messages().len()
    }
}

/// Advice-like request with an authenticated flag.
pub struct AdviceSample {
    pub requirements: String,
    pub recommendation_type: String,
    pub origin: Option<String>,
    pub authenticated: bool,
    pub callback_url: Option<String>,
}

impl AdviceSample {
    pub fn new(requirements: &str) -> Self {
        Self {
            requirements: requirements.to_string(),
            recommendation_type: "stable".to_string(),
            origin: None,
            authenticated: false,
            callback_url: None,
        }
    }
}

impl DispatchRequest for AdviceSample {
    const KIND: WorkKind = WorkKind::Advice;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        if self.authenticated {
            Fingerprint::of(&json!({
                "requirements": self.requirements,
                "recommendation_type": self.recommendation_type,
                "origin": self.origin,
                "authenticated": true,
            }))
        } else {
            Fingerprint::of(&json!({
                "requirements": self.requirements,
                "recommendation_type": self.recommendation_type,
            }))
        }
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        Ok(json!({
            "requirements": self.requirements,
            "recommendation_type": self.recommendation_type,
            "origin": self.origin,
            "authenticated": self.authenticated,
            "callback_url": self.callback_url,
        }))
    }
}

/// Analysis-like request keyed by image content digest.
pub struct ImageSample {
    pub image: String,
    pub image_digest: String,
    pub debug: bool,
}

impl ImageSample {
    pub fn new(image: &str, image_digest: &str) -> Self {
        Self {
            image: image.to_string(),
            image_digest: image_digest.to_string(),
            debug: false,
        }
    }
}

impl DispatchRequest for ImageSample {
    const KIND: WorkKind = WorkKind::Analysis;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        Fingerprint::of_image(&self.image_digest, &json!({ "debug": self.debug }))
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        Ok(json!({ "image": self.image, "debug": self.debug }))
    }
}
