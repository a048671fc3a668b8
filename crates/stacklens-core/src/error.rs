// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stacklens-core.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Document store operation failed.
    #[error("Document store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Cache or message bus operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Publishing a work message failed.
    #[error("Failed to publish message to '{topic}': {reason}")]
    Publish {
        /// Topic the message was addressed to.
        topic: String,
        /// Failure details.
        reason: String,
    },

    /// Orchestrator API call failed.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Work-item id does not carry the prefix of the expected kind.
    #[error("Wrong analysis id provided: '{id}' (expected prefix '{expected_prefix}')")]
    InvalidWorkItemId {
        /// The id as supplied by the client.
        id: String,
        /// Prefix the id should have started with.
        expected_prefix: String,
    },

    /// Orchestrator reported a phase the reconciler does not know.
    #[error("Unreachable - unknown workflow state '{phase}' for '{analysis_id}'")]
    UnknownPhase {
        /// Work item being reconciled.
        analysis_id: String,
        /// Phase as reported by the orchestrator.
        phase: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error was caused by client input rather than a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidWorkItemId { .. })
    }

    /// Short, stable name of the variant for error reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Store(_) => "StoreError",
            Self::Redis(_) => "RedisError",
            Self::Publish { .. } => "PublishError",
            Self::Orchestrator(_) => "OrchestratorError",
            Self::Json(_) => "JsonError",
            Self::InvalidWorkItemId { .. } => "InvalidWorkItemId",
            Self::UnknownPhase { .. } => "UnknownPhase",
            Self::Other(_) => "Error",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Orchestrator(err.to_string())
    }
}

/// Result type using core Error.
pub type Result<T> = std::result::Result<T, Error>;
