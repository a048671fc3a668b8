// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status reconciliation.
//!
//! No single collaborator knows the state of a work item. The reconciler asks
//! them in order of authority and stops at the first one that knows:
//!
//! 1. the result document store (only workers write it; presence means done)
//! 2. the orchestrator (phase of the workflow)
//! 3. the request audit records (dispatched, not yet picked up)
//!
//! Reads never write; asking twice about an unchanged item gives the same answer.

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::kind::{Namespaces, WorkItemId, WorkKind};
use crate::orchestrator::{Orchestrator, WorkflowStatus};
use crate::store::{DocumentEntry, DocumentStore};

/// Collection holding worker logs persisted after a workflow was cleaned up.
pub const WORKFLOW_LOGS_COLLECTION: &str = "workflow-logs";

/// Reconciled state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkState {
    /// Dispatched, not yet known to the orchestrator.
    Queued,
    /// Known to the orchestrator, not started.
    Scheduled,
    /// Running.
    Running,
    /// Finished with a result document.
    Succeeded,
    /// Finished without success.
    Failed,
    /// Unknown work item.
    NotFound,
}

impl WorkState {
    /// HTTP status reported for the state.
    pub fn http_status(&self) -> u16 {
        match self {
            WorkState::Queued | WorkState::Scheduled | WorkState::Running => 202,
            WorkState::Succeeded => 200,
            WorkState::Failed => 400,
            WorkState::NotFound => 404,
        }
    }

    /// Whether the work item will not change state any more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkState::Succeeded | WorkState::Failed | WorkState::NotFound
        )
    }
}

/// Outcome of reconciling one work item.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Work item id.
    pub analysis_id: String,
    /// Reconciled state.
    pub state: WorkState,
    /// Orchestrator report, when the orchestrator was the deciding source.
    pub workflow: Option<WorkflowStatus>,
    /// Result document, when requested and present.
    pub document: Option<Value>,
}

impl Reconciliation {
    /// HTTP status for this outcome.
    pub fn http_status(&self) -> u16 {
        self.state.http_status()
    }

    fn parameters(&self) -> Value {
        json!({ "analysis_id": self.analysis_id })
    }

    /// Body of the result endpoint: the document itself once succeeded,
    /// otherwise an explanation of where the work item is.
    pub fn result_payload(&self) -> Value {
        match self.state {
            WorkState::Succeeded => self.document.clone().unwrap_or_else(|| self.status_payload()),
            WorkState::Queued => queued_payload(&self.analysis_id),
            WorkState::Scheduled => self.with_status("Analysis is being scheduled"),
            WorkState::Running => self.with_status("Analysis is still in progress"),
            WorkState::Failed => self.with_status("Analysis was not successful"),
            WorkState::NotFound => json!({
                "error": format!("Requested result for analysis '{}' was not found", self.analysis_id),
                "parameters": self.parameters(),
            }),
        }
    }

    /// Body of the status endpoint.
    pub fn status_payload(&self) -> Value {
        match self.state {
            WorkState::Queued => queued_payload(&self.analysis_id),
            WorkState::Failed => self.with_status("Analysis was not successful"),
            WorkState::NotFound => json!({
                "error": format!(
                    "Status for analysis '{}' was not found or it has not started yet",
                    self.analysis_id
                ),
                "parameters": self.parameters(),
            }),
            WorkState::Succeeded => json!({
                "status": self.workflow.clone().unwrap_or_else(|| WorkflowStatus::phase("succeeded")),
                "parameters": self.parameters(),
            }),
            WorkState::Scheduled | WorkState::Running => json!({
                "status": self.workflow,
                "parameters": self.parameters(),
            }),
        }
    }

    fn with_status(&self, message: &str) -> Value {
        json!({
            "error": message,
            "status": self.workflow,
            "parameters": self.parameters(),
        })
    }
}

/// Payload for work that is dispatched but not yet scheduled.
pub fn queued_payload(analysis_id: &str) -> Value {
    json!({
        "error": format!("Analysis '{}' is being queued and scheduled for processing", analysis_id),
        "status": WorkflowStatus::queued(),
        "parameters": { "analysis_id": analysis_id },
    })
}

/// Reconciles work items of one kind.
#[derive(Clone)]
pub struct Reconciler {
    kind: WorkKind,
    namespace: String,
    documents: Arc<dyn DocumentStore>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl Reconciler {
    /// Create a reconciler for `kind`.
    pub fn new(
        kind: WorkKind,
        namespaces: &Namespaces,
        documents: Arc<dyn DocumentStore>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            kind,
            namespace: kind.namespace(namespaces).to_string(),
            documents,
            orchestrator,
        }
    }

    /// Kind of work reconciled.
    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    /// Validate that `raw` is an id of this reconciler's kind.
    pub fn validate_id(&self, raw: &str) -> Result<WorkItemId> {
        WorkItemId::parse(self.kind, raw)
    }

    /// State of work item `raw`, without fetching its result document.
    pub async fn status(&self, raw: &str) -> Result<Reconciliation> {
        let id = self.validate_id(raw)?;
        let exists = self
            .documents
            .document_exists(&self.kind.results_collection(), id.as_str())
            .await?;

        if exists {
            return Ok(self.succeeded(id, None));
        }
        self.reconcile_pending(id).await
    }

    /// State of work item `raw`, with its result document when succeeded.
    pub async fn result(&self, raw: &str) -> Result<Reconciliation> {
        let id = self.validate_id(raw)?;
        let document = self
            .documents
            .retrieve_document(&self.kind.results_collection(), id.as_str())
            .await?;

        match document {
            Some(document) => Ok(self.succeeded(id, Some(document))),
            None => self.reconcile_pending(id).await,
        }
    }

    /// Log of work item `raw`: live from the orchestrator, else the persisted copy.
    pub async fn log(&self, raw: &str) -> Result<Option<String>> {
        let id = self.validate_id(raw)?;

        if let Some(log) = self
            .orchestrator
            .workflow_node_log(&self.namespace, id.as_str(), self.kind.log_node())
            .await?
        {
            return Ok(Some(log));
        }

        let stored = self
            .documents
            .retrieve_document(WORKFLOW_LOGS_COLLECTION, id.as_str())
            .await?;

        Ok(stored.and_then(|doc| match doc {
            Value::String(log) => Some(log),
            Value::Object(mut fields) => match fields.remove("log") {
                Some(Value::String(log)) => Some(log),
                _ => None,
            },
            _ => None,
        }))
    }

    /// Total count and one page (newest first) of dispatched work items.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<(u64, Vec<DocumentEntry>)> {
        let collection = self.kind.requests_collection();
        let total = self.documents.count(&collection).await?;
        let entries = self.documents.list(&collection, offset, limit).await?;
        Ok((total, entries))
    }

    fn succeeded(&self, id: WorkItemId, document: Option<Value>) -> Reconciliation {
        debug!(analysis_id = %id, "Result document present");
        Reconciliation {
            analysis_id: id.into_string(),
            state: WorkState::Succeeded,
            workflow: None,
            document,
        }
    }

    async fn reconcile_pending(&self, id: WorkItemId) -> Result<Reconciliation> {
        let workflow = self
            .orchestrator
            .workflow_status(&self.namespace, id.as_str())
            .await?;

        let state = match &workflow {
            Some(status) => match status.state.as_str() {
                "running" => WorkState::Running,
                "failed" | "error" => WorkState::Failed,
                "pending" => WorkState::Scheduled,
                other => {
                    error!(
                        analysis_id = %id,
                        namespace = %self.namespace,
                        phase = %other,
                        "Unreachable - unknown workflow state"
                    );
                    return Err(Error::UnknownPhase {
                        analysis_id: id.into_string(),
                        phase: other.to_string(),
                    });
                }
            },
            None => {
                let requested = self
                    .documents
                    .document_exists(&self.kind.requests_collection(), id.as_str())
                    .await?;
                if requested {
                    WorkState::Queued
                } else {
                    WorkState::NotFound
                }
            }
        };

        debug!(analysis_id = %id, state = ?state, "Work item reconciled");
        Ok(Reconciliation {
            analysis_id: id.into_string(),
            state,
            workflow,
            document: None,
        })
    }
}
