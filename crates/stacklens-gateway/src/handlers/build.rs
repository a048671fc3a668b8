// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build analysis and repository initialization.
//!
//! A build analysis is a composite: the base and output images of a build are
//! analyzed like any other image (sharing the image analysis cache) and the
//! build log is parsed by its own worker, deduplicated by the digest of the log.
//! A single `build-analysis` message carries the ids of every part that still
//! needs to run; parts answered from a cache are sent as `null`.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use stacklens_core::dispatch::DispatchRequest;
use stacklens_core::{Fingerprint, WorkKind};

use super::analysis::{AnalysisRequest, inspect, store_analysis_by_digest};
use super::{ApiResponse, BUILDLOGS_COLLECTION, GatewayState, HandlerResult};
use crate::error::ApiError;
use crate::image::ImageRequest;
use crate::params::parse_project_url;

fn default_true() -> bool {
    true
}

/// Query carrying only the cache bypass flag.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ForceQuery {
    /// Bypass the dedup caches.
    #[serde(default)]
    pub force: bool,
}

/// Body of `POST /build`.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildBody {
    /// Image the build started from.
    #[serde(default)]
    pub base_image: Option<String>,
    /// Image the build produced.
    #[serde(default)]
    pub output_image: Option<String>,
    /// Build log document.
    #[serde(default)]
    pub build_log: Option<Value>,
    /// Registry user of the base image.
    #[serde(default)]
    pub base_registry_user: Option<String>,
    /// Registry password of the base image.
    #[serde(default)]
    pub base_registry_password: Option<String>,
    /// Verify the TLS certificate of the base image registry.
    #[serde(default = "default_true")]
    pub base_registry_verify_tls: bool,
    /// Registry user of the output image.
    #[serde(default)]
    pub output_registry_user: Option<String>,
    /// Registry password of the output image.
    #[serde(default)]
    pub output_registry_password: Option<String>,
    /// Verify the TLS certificate of the output image registry.
    #[serde(default = "default_true")]
    pub output_registry_verify_tls: bool,
    /// Run the analyzers in debug mode.
    #[serde(default)]
    pub debug: bool,
    /// Environment type of the images.
    #[serde(default)]
    pub environment_type: Option<String>,
    /// Origin of the request.
    #[serde(default)]
    pub origin: Option<String>,
}

/// Body of `POST /repo/init`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoInitBody {
    /// GitHub project URL.
    pub project_url: String,
}

// ============================================================================
// Requests
// ============================================================================

/// Trigger message of a build analysis, already assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    message: Value,
}

impl BuildRequest {
    /// Wrap an assembled trigger message.
    pub fn new(message: Value) -> Self {
        Self { message }
    }
}

impl DispatchRequest for BuildRequest {
    const KIND: WorkKind = WorkKind::BuildAnalysis;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        Fingerprint::of(&self.audit_record()?)
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        Ok(self.message.clone())
    }

    fn audit_record(&self) -> stacklens_core::Result<Value> {
        let mut record = self.message.clone();
        if let Some(fields) = record.as_object_mut() {
            for field in ["base_registry_password", "output_registry_password"] {
                if fields.get(field).is_some_and(|v| !v.is_null()) {
                    fields.insert(field.to_string(), json!("***"));
                }
            }
        }
        Ok(record)
    }
}

/// A build log to parse, identified by its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildLogRequest {
    build_log: Value,
}

impl BuildLogRequest {
    /// Request parsing `build_log`.
    pub fn new(build_log: Value) -> Self {
        Self { build_log }
    }

    /// Id the build log is stored under.
    pub fn document_id(&self) -> stacklens_core::Result<String> {
        Ok(format!("buildlog-{}", self.fingerprint()?))
    }
}

impl DispatchRequest for BuildLogRequest {
    const KIND: WorkKind = WorkKind::BuildLogParser;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        Fingerprint::of(&self.build_log)
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        Ok(json!({ "buildlog_document_id": self.document_id()? }))
    }
}

/// Repository initialization of a GitHub project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInitRequest {
    project_url: String,
}

impl RepoInitRequest {
    /// Validate `project_url`.
    pub fn parse(project_url: &str) -> Result<Self, String> {
        Ok(Self {
            project_url: parse_project_url(project_url)?,
        })
    }
}

impl DispatchRequest for RepoInitRequest {
    const KIND: WorkKind = WorkKind::RepoInit;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        Fingerprint::of(&self.message()?)
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        Ok(json!({ "project_url": self.project_url }))
    }
}

// ============================================================================
// Build analysis
// ============================================================================

/// One image of a build, resolved to an analysis id.
struct ImagePart {
    request: AnalysisRequest,
    fingerprint: Fingerprint,
    analysis_id: String,
    cached: bool,
}

impl ImagePart {
    fn summary(&self) -> Value {
        json!({
            "analysis_id": self.analysis_id,
            "cached": self.cached,
            "parameters": self.request.parameters(),
        })
    }

    /// Id to send to the worker; `None` when an earlier analysis is reused.
    fn scheduled_id(&self) -> Option<&str> {
        (!self.cached).then_some(self.analysis_id.as_str())
    }
}

async fn resolve_image(
    state: &GatewayState,
    image: ImageRequest,
    body: &BuildBody,
    force: bool,
) -> Result<ImagePart, ApiError> {
    let metadata = inspect(state, &image).await?;
    let request = AnalysisRequest::new(
        &image,
        metadata.digest,
        body.debug,
        body.environment_type.clone(),
        body.origin.clone(),
    );
    let fingerprint = request.fingerprint()?;

    let cached = if force {
        None
    } else {
        state.analysis.lookup_fresh(&fingerprint).await?
    };

    Ok(match cached {
        Some(record) => ImagePart {
            request,
            fingerprint,
            analysis_id: record.analysis_id,
            cached: true,
        },
        None => ImagePart {
            request,
            fingerprint,
            analysis_id: state.analysis.allocate_id(),
            cached: false,
        },
    })
}

/// The build log of a build, stored and resolved to a parser id.
struct BuildLogPart {
    fingerprint: Fingerprint,
    document_id: String,
    parser_id: String,
    cached: bool,
}

async fn resolve_build_log(state: &GatewayState, build_log: Value, force: bool) -> Result<BuildLogPart, ApiError> {
    let request = BuildLogRequest::new(build_log);
    let fingerprint = request.fingerprint()?;
    let document_id = request.document_id()?;

    state
        .documents
        .store_document(BUILDLOGS_COLLECTION, &document_id, &request.build_log)
        .await?;

    let cached = if force {
        None
    } else {
        state.buildlogs.lookup_fresh(&fingerprint).await?
    };

    Ok(match cached {
        Some(record) => BuildLogPart {
            fingerprint,
            document_id,
            parser_id: record.analysis_id,
            cached: true,
        },
        None => BuildLogPart {
            fingerprint,
            document_id,
            parser_id: state.buildlogs.allocate_id(),
            cached: false,
        },
    })
}

/// Handle `POST /build`.
pub async fn handle_post_build(state: &GatewayState, body: BuildBody, force: bool) -> HandlerResult {
    if body.base_image.is_none() && body.output_image.is_none() && body.build_log.is_none() {
        return Err(ApiError::bad_request("No base, output nor build log provided"));
    }

    let base = match &body.base_image {
        Some(image) => {
            let image = ImageRequest::new(image.clone())
                .with_credentials(body.base_registry_user.clone(), body.base_registry_password.clone())
                .with_verify_tls(body.base_registry_verify_tls);
            Some(resolve_image(state, image, &body, force).await?)
        }
        None => None,
    };

    let output = match &body.output_image {
        Some(image) => {
            let image = ImageRequest::new(image.clone())
                .with_credentials(
                    body.output_registry_user.clone(),
                    body.output_registry_password.clone(),
                )
                .with_verify_tls(body.output_registry_verify_tls);
            Some(resolve_image(state, image, &body, force).await?)
        }
        None => None,
    };

    let build_log = match &body.build_log {
        Some(build_log) => Some(resolve_build_log(state, build_log.clone(), force).await?),
        None => None,
    };

    let request = BuildRequest::new(json!({
        "base_image": body.base_image,
        "base_image_analysis_id": base.as_ref().and_then(ImagePart::scheduled_id),
        "base_registry_user": body.base_registry_user,
        "base_registry_password": body.base_registry_password,
        "base_registry_verify_tls": body.base_registry_verify_tls,
        "output_image": body.output_image,
        "output_image_analysis_id": output.as_ref().and_then(ImagePart::scheduled_id),
        "output_registry_user": body.output_registry_user,
        "output_registry_password": body.output_registry_password,
        "output_registry_verify_tls": body.output_registry_verify_tls,
        "environment_type": body.environment_type,
        "buildlog_document_id": build_log.as_ref().map(|part| &part.document_id),
        "buildlog_parser_id": build_log
            .as_ref()
            .filter(|part| !part.cached)
            .map(|part| &part.parser_id),
        "origin": body.origin,
        "debug": body.debug,
    }));
    let outcome = state.build.submit(&request).await?;

    // The parts are only reachable once the trigger message is out.
    for part in base.iter().chain(output.iter()) {
        let summary = part.summary();
        if !part.cached {
            state.analysis.remember(&part.fingerprint, &part.analysis_id).await;
            state.analysis.record_request(&part.analysis_id, &part.request.parameters()).await;
        }
        store_analysis_by_digest(state, part.request.image_digest(), &summary).await;
    }
    if let Some(part) = build_log.as_ref().filter(|part| !part.cached) {
        state.buildlogs.remember(&part.fingerprint, &part.parser_id).await;
    }

    info!(
        analysis_id = %outcome.analysis_id,
        base_image = ?body.base_image,
        output_image = ?body.output_image,
        build_log = build_log.is_some(),
        "Build analysis accepted"
    );

    Ok(ApiResponse::accepted(json!({
        "analysis_id": outcome.analysis_id,
        "base_image_analysis": base.as_ref().map(ImagePart::summary),
        "output_image_analysis": output.as_ref().map(ImagePart::summary),
        "buildlog_analysis": build_log.as_ref().map(|part| json!({
            "analysis_id": part.parser_id,
            "cached": part.cached,
        })),
        "buildlog_document_id": build_log.as_ref().map(|part| &part.document_id),
    })))
}

/// Handle `GET /buildlog/{document_id}`.
pub async fn handle_get_buildlog(state: &GatewayState, document_id: &str) -> HandlerResult {
    state
        .documents
        .retrieve_document(BUILDLOGS_COLLECTION, document_id)
        .await?
        .map(ApiResponse::ok)
        .ok_or_else(|| {
            ApiError::not_found(format!("Requested build log '{}' was not found", document_id))
                .with_parameters(json!({ "document_id": document_id }))
        })
}

// ============================================================================
// Repository initialization
// ============================================================================

/// Handle `POST /repo/init`.
pub async fn handle_post_repo_init(state: &GatewayState, body: RepoInitBody) -> HandlerResult {
    let request = RepoInitRequest::parse(&body.project_url).map_err(|e| {
        ApiError::bad_request(e).with_parameters(json!({ "project_url": body.project_url }))
    })?;
    let outcome = state.repo_init.submit(&request).await?;

    info!(
        analysis_id = %outcome.analysis_id,
        project_url = %request.project_url,
        "Repository initialization accepted"
    );

    Ok(ApiResponse::accepted(json!({
        "analysis_id": outcome.analysis_id,
        "cached": false,
        "parameters": { "project_url": request.project_url },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_record_masks_registry_passwords() {
        let request = BuildRequest::new(json!({
            "base_registry_password": "s3cret",
            "output_registry_password": null,
            "debug": false,
        }));

        let record = request.audit_record().unwrap();
        assert_eq!(record["base_registry_password"], "***");
        assert!(record["output_registry_password"].is_null());
        assert_eq!(request.message().unwrap()["base_registry_password"], "s3cret");
    }

    #[test]
    fn build_logs_are_stored_under_their_digest() {
        let a = BuildLogRequest::new(json!({"log": "step 1/3"}));
        let b = BuildLogRequest::new(json!({"log": "step 1/3"}));
        let c = BuildLogRequest::new(json!({"log": "step 2/3"}));

        assert_eq!(a.document_id().unwrap(), b.document_id().unwrap());
        assert_ne!(a.document_id().unwrap(), c.document_id().unwrap());
        assert!(a.document_id().unwrap().starts_with("buildlog-"));
    }

    #[test]
    fn repo_init_requires_a_github_project() {
        let request = RepoInitRequest::parse("https://github.com/org/repo/").unwrap();
        assert_eq!(request.message().unwrap()["project_url"], "https://github.com/org/repo");

        assert!(RepoInitRequest::parse("https://gitlab.com/org/repo").is_err());
        assert!(RepoInitRequest::parse("https://github.com/org").is_err());
    }
}
