// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrator status API.
//!
//! The orchestrator runs the workflows that workers execute. The gateway
//! only needs three things from it: fresh work-item ids, the phase of a
//! workflow and the log of one of its nodes. "Unknown workflow" is reported
//! as `Ok(None)` so callers can fall back to other sources.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Status report of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Phase as reported by the orchestrator (`pending`, `running`, `failed`, ...).
    pub state: String,
    /// When the workflow started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, if any.
    #[serde(default)]
    pub reason: Option<String>,
}

impl WorkflowStatus {
    /// Status with only a phase set.
    pub fn phase(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// Status of work that was accepted but not picked up yet.
    pub fn queued() -> Self {
        Self::phase("pending")
    }
}

/// Orchestrator operations used by dispatch and reconciliation.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Generate a new work-item id with the given prefix.
    fn generate_id(&self, prefix: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", prefix, &suffix[..16])
    }

    /// Status of workflow `id` in `namespace`; `None` if the orchestrator
    /// does not know it.
    async fn workflow_status(&self, namespace: &str, id: &str) -> Result<Option<WorkflowStatus>>;

    /// Log of `node` in workflow `id`; `None` if the workflow or node is unknown.
    async fn workflow_node_log(&self, namespace: &str, id: &str, node: &str)
    -> Result<Option<String>>;
}

// ============================================================================
// HTTP client
// ============================================================================

/// Orchestrator reached over its JSON HTTP API.
///
/// - `GET {base}/api/v1/namespaces/{ns}/workflows/{id}` returns a [`WorkflowStatus`]
/// - `GET {base}/api/v1/namespaces/{ns}/workflows/{id}/nodes/{node}/log` returns plain text
///
/// Both answer 404 for unknown workflows.
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrchestrator {
    /// Create a client for the orchestrator at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn workflow_url(&self, namespace: &str, id: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/workflows/{}",
            self.base_url, namespace, id
        )
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn workflow_status(&self, namespace: &str, id: &str) -> Result<Option<WorkflowStatus>> {
        let url = self.workflow_url(namespace, id);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(workflow = %id, namespace = %namespace, "Workflow not known to orchestrator");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(Error::Orchestrator(format!(
                "status query for '{}' failed with HTTP {}",
                id, status
            ))),
        }
    }

    async fn workflow_node_log(
        &self,
        namespace: &str,
        id: &str,
        node: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/nodes/{}/log", self.workflow_url(namespace, id), node);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => Err(Error::Orchestrator(format!(
                "log query for '{}' node '{}' failed with HTTP {}",
                id, node, status
            ))),
        }
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Scriptable orchestrator for tests and local development.
///
/// Ids are sequential (`<prefix>-0000000000000001`, ...). Status and log
/// queries are counted so tests can check which sources were consulted.
#[derive(Debug, Default)]
pub struct MockOrchestrator {
    statuses: DashMap<String, WorkflowStatus>,
    logs: DashMap<String, String>,
    next_id: AtomicU64,
    status_queries: AtomicU64,
    unavailable: AtomicBool,
}

impl MockOrchestrator {
    /// Create an orchestrator that knows no workflows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `phase` for workflow `id`.
    pub fn set_phase(&self, id: &str, phase: &str) {
        self.statuses
            .insert(id.to_string(), WorkflowStatus::phase(phase));
    }

    /// Report a full status for workflow `id`.
    pub fn set_status(&self, id: &str, status: WorkflowStatus) {
        self.statuses.insert(id.to_string(), status);
    }

    /// Make workflow `id` unknown again.
    pub fn forget(&self, id: &str) {
        self.statuses.remove(id);
        self.logs.remove(id);
    }

    /// Serve `log` for any node of workflow `id`.
    pub fn set_log(&self, id: &str, log: &str) {
        self.logs.insert(id.to_string(), log.to_string());
    }

    /// Fail every status and log query.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of status queries served.
    pub fn status_queries(&self) -> u64 {
        self.status_queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Orchestrator("orchestrator unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    fn generate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{:016x}", prefix, n)
    }

    async fn workflow_status(&self, _namespace: &str, id: &str) -> Result<Option<WorkflowStatus>> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.statuses.get(id).map(|s| s.clone()))
    }

    async fn workflow_node_log(
        &self,
        _namespace: &str,
        id: &str,
        _node: &str,
    ) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.logs.get(id).map(|l| l.clone()))
    }
}
