// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic work dispatcher.
//!
//! One [`Dispatcher`] is instantiated per kind of request. Requests describe
//! themselves through [`DispatchRequest`]: which fields make up their
//! fingerprint, what message the worker receives and what is recorded for
//! auditing. The dispatcher owns the rest of the protocol:
//!
//! ```text
//!   fingerprint ──► cache lookup ──fresh──► (cached id, cached=true)
//!                        │
//!                   miss/stale/force
//!                        ▼
//!   allocate id ──► publish ──fail──► Error::Publish (nothing written)
//!                        │
//!                        ▼
//!   cache upsert ──► audit record ──► (new id, cached=false)
//! ```
//!
//! Writes after a successful publish are best effort: the work item already
//! exists, so a failed cache or audit write is logged and the new id is still
//! returned.

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::{CacheLookup, CacheRecord, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::kind::WorkKind;
use crate::orchestrator::Orchestrator;
use crate::publisher::MessagePublisher;
use crate::store::DocumentStore;

/// Identity of the dispatching service, attached to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Version of the dispatching service.
    pub service_version: String,
    /// Name of the dispatching component.
    pub component_name: String,
}

/// A validated request that can be dispatched as work of kind [`Self::KIND`].
pub trait DispatchRequest: Send + Sync {
    /// Kind of work the request creates.
    const KIND: WorkKind;

    /// Fingerprint of the result-affecting parameters.
    fn fingerprint(&self) -> Result<Fingerprint>;

    /// Worker message parameters (a JSON object, without envelope fields).
    fn message(&self) -> Result<Value>;

    /// Record stored for auditing under the new work-item id.
    fn audit_record(&self) -> Result<Value> {
        self.message()
    }
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Work item handling the request.
    pub analysis_id: String,
    /// Whether an earlier work item was reused.
    pub cached: bool,
    /// Fingerprint of the request, if it was fingerprinted.
    pub fingerprint: Option<Fingerprint>,
}

/// Collaborators shared by every dispatcher of a process.
#[derive(Clone)]
pub struct DispatchContext {
    /// Message bus.
    pub publisher: Arc<dyn MessagePublisher>,
    /// Id source.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Audit record store.
    pub documents: Arc<dyn DocumentStore>,
    /// Service identity for message envelopes.
    pub service: ServiceInfo,
    /// Prefix of every topic name.
    pub topic_prefix: String,
    /// Time source for cache records.
    pub clock: Arc<dyn Clock>,
}

impl DispatchContext {
    /// Create a context using the system clock.
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        orchestrator: Arc<dyn Orchestrator>,
        documents: Arc<dyn DocumentStore>,
        service: ServiceInfo,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            orchestrator,
            documents,
            service,
            topic_prefix: topic_prefix.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Full topic name for `kind`.
    pub fn topic_for(&self, kind: WorkKind) -> String {
        if self.topic_prefix.is_empty() {
            kind.topic().to_string()
        } else {
            format!("{}.{}", self.topic_prefix, kind.topic())
        }
    }
}

/// Dispatcher for requests of type `R`.
pub struct Dispatcher<R> {
    context: DispatchContext,
    topic: String,
    cache: Option<Arc<dyn CacheStore>>,
    ttl: Option<Duration>,
    _request: PhantomData<fn(&R)>,
}

impl<R: DispatchRequest> Dispatcher<R> {
    /// Create a dispatcher without a dedup cache; every dispatch publishes.
    pub fn new(context: DispatchContext) -> Self {
        let topic = context.topic_for(R::KIND);
        Self {
            context,
            topic,
            cache: None,
            ttl: None,
            _request: PhantomData,
        }
    }

    /// Deduplicate through `cache`. Records older than `ttl` are not reused;
    /// without a TTL records never expire and are written without a timestamp.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    /// Kind of work this dispatcher creates.
    pub fn kind(&self) -> WorkKind {
        R::KIND
    }

    /// Topic messages are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Dispatch `request`, reusing a fresh cached work item unless `force` is set.
    pub async fn dispatch(&self, request: &R, force: bool) -> Result<DispatchOutcome> {
        let fingerprint = request.fingerprint()?;

        if !force {
            if let Some(record) = self.lookup_fresh(&fingerprint).await? {
                info!(
                    kind = %R::KIND,
                    analysis_id = %record.analysis_id,
                    fingerprint = %fingerprint,
                    "Reusing cached work item"
                );
                return Ok(DispatchOutcome {
                    analysis_id: record.analysis_id,
                    cached: true,
                    fingerprint: Some(fingerprint),
                });
            }
        } else {
            debug!(kind = %R::KIND, fingerprint = %fingerprint, "Cache lookup bypassed by force");
        }

        let analysis_id = self.allocate_id();
        self.publish(&analysis_id, &request.message()?).await?;
        self.remember(&fingerprint, &analysis_id).await;
        self.record_audit(&analysis_id, request).await;

        Ok(DispatchOutcome {
            analysis_id,
            cached: false,
            fingerprint: Some(fingerprint),
        })
    }

    /// Dispatch `request` without fingerprinting or cache lookup.
    pub async fn submit(&self, request: &R) -> Result<DispatchOutcome> {
        let analysis_id = self.allocate_id();
        self.publish(&analysis_id, &request.message()?).await?;
        self.record_audit(&analysis_id, request).await;

        Ok(DispatchOutcome {
            analysis_id,
            cached: false,
            fingerprint: None,
        })
    }

    /// Cache record for `fingerprint` if one exists and is fresh.
    pub async fn lookup_fresh(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };

        match cache.lookup(fingerprint).await? {
            CacheLookup::Found(record) if record.is_fresh(self.ttl, self.context.clock.now()) => {
                Ok(Some(record))
            }
            CacheLookup::Found(record) => {
                debug!(
                    kind = %R::KIND,
                    analysis_id = %record.analysis_id,
                    "Cached work item is stale"
                );
                Ok(None)
            }
            CacheLookup::Miss => {
                debug!(kind = %R::KIND, fingerprint = %fingerprint, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Allocate a new work-item id of this dispatcher's kind.
    pub fn allocate_id(&self) -> String {
        self.context
            .orchestrator
            .generate_id(R::KIND.id_prefix())
    }

    /// Point `fingerprint` at `analysis_id` in the cache. Failures are logged.
    pub async fn remember(&self, fingerprint: &Fingerprint, analysis_id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };

        let record = match self.ttl {
            Some(_) => CacheRecord::new(analysis_id, self.context.clock.now()),
            None => CacheRecord::untimed(analysis_id),
        };

        if let Err(e) = cache.store(fingerprint, &record).await {
            error!(
                kind = %R::KIND,
                analysis_id = %analysis_id,
                error = %e,
                "Failed to store cache record"
            );
        }
    }

    /// Store `record` as the audit record of `analysis_id`. Failures are logged.
    pub async fn record_request(&self, analysis_id: &str, record: &Value) {
        let collection = R::KIND.requests_collection();
        if let Err(e) = self
            .context
            .documents
            .store_document(&collection, analysis_id, record)
            .await
        {
            error!(
                kind = %R::KIND,
                analysis_id = %analysis_id,
                error = %e,
                "Failed to store request record"
            );
        }
    }

    async fn record_audit(&self, analysis_id: &str, request: &R) {
        match request.audit_record() {
            Ok(record) => self.record_request(analysis_id, &record).await,
            Err(e) => error!(
                kind = %R::KIND,
                analysis_id = %analysis_id,
                error = %e,
                "Failed to build request record"
            ),
        }
    }

    async fn publish(&self, analysis_id: &str, message: &Value) -> Result<()> {
        let envelope = self.envelope(analysis_id, message)?;
        self.context
            .publisher
            .publish(&self.topic, &envelope)
            .await
            .inspect_err(|e| {
                error!(
                    kind = %R::KIND,
                    topic = %self.topic,
                    analysis_id = %analysis_id,
                    error = %e,
                    "Failed to publish work message"
                )
            })?;

        info!(
            kind = %R::KIND,
            topic = %self.topic,
            analysis_id = %analysis_id,
            "Work message published"
        );
        Ok(())
    }

    fn envelope(&self, analysis_id: &str, message: &Value) -> Result<Value> {
        let Value::Object(params) = message else {
            return Err(Error::Other(format!(
                "{} message must be a JSON object",
                R::KIND
            )));
        };

        let mut envelope = params.clone();
        envelope.insert("job_id".to_string(), Value::from(analysis_id));
        envelope.insert(
            "service_version".to_string(),
            Value::from(self.context.service.service_version.as_str()),
        );
        envelope.insert(
            "component_name".to_string(),
            Value::from(self.context.service.component_name.as_str()),
        );
        Ok(Value::Object(envelope))
    }
}
