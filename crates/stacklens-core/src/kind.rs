// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work kinds and work-item identifiers.
//!
//! Every dispatched unit of work has a kind. The kind decides the id prefix,
//! the topic the trigger message goes to, the namespace the orchestrator runs
//! it in and the document collections its records live in.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of dispatched work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkKind {
    /// Container image package extraction.
    Analysis,
    /// Provenance check of an application stack.
    Provenance,
    /// Dependency resolution advice.
    Advice,
    /// Analysis of a container build (base image, output image, build log).
    BuildAnalysis,
    /// Build log parsing, scheduled as part of a build analysis.
    BuildLogParser,
    /// Repository initialization.
    RepoInit,
}

impl WorkKind {
    /// Prefix of generated work-item ids (without the trailing dash).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            WorkKind::Analysis => "package-extract",
            WorkKind::Provenance => "provenance-checker",
            WorkKind::Advice => "adviser",
            WorkKind::BuildAnalysis => "build-analysis",
            WorkKind::BuildLogParser => "buildlog-parser",
            WorkKind::RepoInit => "repo-init",
        }
    }

    /// Topic (without the deployment prefix) trigger messages are published to.
    pub fn topic(&self) -> &'static str {
        match self {
            WorkKind::Analysis => "package-extract-trigger",
            WorkKind::Provenance => "provenance-checker-trigger",
            WorkKind::Advice => "adviser-trigger",
            WorkKind::BuildAnalysis => "build-analysis-trigger",
            WorkKind::BuildLogParser => "buildlog-parser-trigger",
            WorkKind::RepoInit => "repo-init-trigger",
        }
    }

    /// Workflow node whose log is reported for this kind.
    pub fn log_node(&self) -> &'static str {
        match self {
            WorkKind::Analysis => "extract-packages",
            WorkKind::Provenance => "provenance-check",
            WorkKind::Advice => "advise",
            WorkKind::BuildAnalysis => "build-analysis",
            WorkKind::BuildLogParser => "parse-buildlog",
            WorkKind::RepoInit => "repo-init",
        }
    }

    /// Collection holding result documents written by workers.
    pub fn results_collection(&self) -> String {
        format!("{}-results", self.id_prefix())
    }

    /// Collection holding request audit records written on dispatch.
    pub fn requests_collection(&self) -> String {
        format!("{}-requests", self.id_prefix())
    }

    /// Namespace the orchestrator schedules this kind of work in.
    pub fn namespace<'a>(&self, namespaces: &'a Namespaces) -> &'a str {
        match self {
            WorkKind::Analysis | WorkKind::BuildAnalysis | WorkKind::BuildLogParser => {
                &namespaces.middletier
            }
            WorkKind::Provenance | WorkKind::Advice | WorkKind::RepoInit => &namespaces.backend,
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Orchestrator namespaces work is scheduled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    /// Namespace for image and build analyses.
    pub middletier: String,
    /// Namespace for advice, provenance checks and repository jobs.
    pub backend: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            middletier: "stacklens-middletier".to_string(),
            backend: "stacklens-backend".to_string(),
        }
    }
}

/// A validated work-item id of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    /// Validate that `raw` is an id of `kind`.
    ///
    /// The prefix is authoritative: ids of other kinds are rejected before any
    /// store is queried.
    pub fn parse(kind: WorkKind, raw: &str) -> Result<Self> {
        let expected_prefix = format!("{}-", kind.id_prefix());
        match raw.strip_prefix(&expected_prefix) {
            Some(suffix) if !suffix.is_empty() => Ok(Self(raw.to_string())),
            _ => Err(Error::InvalidWorkItemId {
                id: raw.to_string(),
                expected_prefix,
            }),
        }
    }

    /// Id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
