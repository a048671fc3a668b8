// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container image analysis.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use stacklens_core::dispatch::DispatchRequest;
use stacklens_core::{Fingerprint, WorkKind};

use super::{ANALYSIS_BY_DIGEST_COLLECTION, ApiResponse, GatewayState, HandlerResult};
use crate::error::ApiError;
use crate::image::{ImageMetadata, ImageRequest};

fn default_true() -> bool {
    true
}

/// Body of `POST /analyze`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeBody {
    /// Image to analyze.
    pub image: String,
    /// Run the analyzer in debug mode.
    #[serde(default)]
    pub debug: bool,
    /// Registry user.
    #[serde(default)]
    pub registry_user: Option<String>,
    /// Registry password.
    #[serde(default)]
    pub registry_password: Option<String>,
    /// Environment type (`runtime` or `buildtime`).
    #[serde(default)]
    pub environment_type: Option<String>,
    /// Origin of the request (repository URL, ...).
    #[serde(default)]
    pub origin: Option<String>,
    /// Verify the registry TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

impl AnalyzeBody {
    /// Registry part of the request.
    pub fn image_request(&self) -> ImageRequest {
        ImageRequest::new(self.image.clone())
            .with_credentials(self.registry_user.clone(), self.registry_password.clone())
            .with_verify_tls(self.verify_tls)
    }
}

/// Body of `POST /image/metadata`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageMetadataBody {
    /// Image to inspect.
    pub image: String,
    /// Registry user.
    #[serde(default)]
    pub registry_user: Option<String>,
    /// Registry password.
    #[serde(default)]
    pub registry_password: Option<String>,
    /// Verify the registry TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

/// A validated image analysis request of an inspected image.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    image: String,
    image_digest: String,
    debug: bool,
    registry_user: Option<String>,
    registry_password: Option<String>,
    environment_type: String,
    origin: Option<String>,
    verify_tls: bool,
}

impl AnalysisRequest {
    /// Request for `image`, whose manifest has content digest `image_digest`.
    pub fn new(
        image: &ImageRequest,
        image_digest: impl Into<String>,
        debug: bool,
        environment_type: Option<String>,
        origin: Option<String>,
    ) -> Self {
        Self {
            image: image.image.clone(),
            image_digest: image_digest.into(),
            debug,
            registry_user: image.registry_user.clone(),
            registry_password: image.registry_password.clone(),
            environment_type: environment_type.unwrap_or_else(|| "runtime".to_string()),
            origin,
            verify_tls: image.verify_tls,
        }
    }

    /// Content digest of the analyzed image.
    pub fn image_digest(&self) -> &str {
        &self.image_digest
    }

    /// Parameters echoed to the client; the registry password is never included.
    pub fn parameters(&self) -> Value {
        json!({
            "image": self.image,
            "debug": self.debug,
            "registry_user": self.registry_user,
            "environment_type": self.environment_type,
            "origin": self.origin,
            "verify_tls": self.verify_tls,
            "is_external": true,
        })
    }
}

impl DispatchRequest for AnalysisRequest {
    const KIND: WorkKind = WorkKind::Analysis;

    // Credentials do not change the analysis result and must not be derivable
    // from cache keys.
    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        Fingerprint::of_image(
            &self.image_digest,
            &json!({
                "debug": self.debug,
                "environment_type": self.environment_type,
                "origin": self.origin,
                "verify_tls": self.verify_tls,
                "is_external": true,
            }),
        )
    }

    fn message(&self) -> stacklens_core::Result<Value> {
        let mut message = self.parameters();
        message["registry_password"] = json!(self.registry_password);
        Ok(message)
    }

    fn audit_record(&self) -> stacklens_core::Result<Value> {
        Ok(self.parameters())
    }
}

/// Inspect `image`, mapping registry failures to client errors.
pub(crate) async fn inspect(state: &GatewayState, image: &ImageRequest) -> Result<ImageMetadata, ApiError> {
    state
        .inspector
        .inspect(image)
        .await
        .map_err(|e| ApiError::from(e).with_parameters(image.parameters()))
}

/// Remember which analysis covers the image with `digest`. Failures are logged.
pub(crate) async fn store_analysis_by_digest(state: &GatewayState, digest: &str, analysis: &Value) {
    if let Err(e) = state
        .documents
        .store_document(ANALYSIS_BY_DIGEST_COLLECTION, digest, analysis)
        .await
    {
        error!(image_digest = %digest, error = %e, "Failed to store analysis by digest");
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle `POST /analyze`.
pub async fn handle_post_analyze(state: &GatewayState, body: AnalyzeBody, force: bool) -> HandlerResult {
    let image = body.image_request();
    let metadata = inspect(state, &image).await?;

    let request = AnalysisRequest::new(
        &image,
        metadata.digest,
        body.debug,
        body.environment_type,
        body.origin,
    );
    let outcome = state.analysis.dispatch(&request, force).await?;

    info!(
        analysis_id = %outcome.analysis_id,
        image = %body.image,
        image_digest = %request.image_digest(),
        cached = outcome.cached,
        "Image analysis accepted"
    );

    let response = json!({
        "analysis_id": outcome.analysis_id,
        "cached": outcome.cached,
        "parameters": request.parameters(),
    });
    store_analysis_by_digest(state, request.image_digest(), &response).await;

    Ok(ApiResponse::accepted(response))
}

/// Handle `POST /image/metadata`.
pub async fn handle_post_image_metadata(state: &GatewayState, body: ImageMetadataBody) -> HandlerResult {
    let image = ImageRequest::new(body.image)
        .with_credentials(body.registry_user, body.registry_password)
        .with_verify_tls(body.verify_tls);
    let metadata = inspect(state, &image).await?;

    let body = serde_json::to_value(&metadata).map_err(stacklens_core::Error::from)?;
    Ok(ApiResponse::ok(body))
}

/// Handle `GET /analyze/by-hash/{image_hash}`.
pub async fn handle_get_analyze_by_hash(state: &GatewayState, image_hash: &str) -> HandlerResult {
    let analysis = state
        .documents
        .retrieve_document(ANALYSIS_BY_DIGEST_COLLECTION, image_hash)
        .await?;

    let analysis_id = analysis
        .as_ref()
        .and_then(|a| a.get("analysis_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ApiError::not_found("No analysis was performed for image described by the given image hash")
                .with_parameters(json!({ "image_hash": image_hash }))
        })?;

    super::status::handle_get_result(state, WorkKind::Analysis, analysis_id).await
}
