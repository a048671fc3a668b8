// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health checks and the API index.

use axum::http::StatusCode;
use serde_json::json;
use tracing::warn;

use super::{ApiResponse, GatewayState, HandlerResult};
use crate::error::ApiError;

/// Routes listed by the API index.
pub const API_V1_ROUTES: &[&str] = &[
    "/api/v1/analyze",
    "/api/v1/analyze/by-hash/{image_hash}",
    "/api/v1/image/metadata",
    "/api/v1/provenance/python",
    "/api/v1/advise/python",
    "/api/v1/build",
    "/api/v1/buildlog/{document_id}",
    "/api/v1/repo/init",
];

/// Handle `GET /liveness`.
pub fn handle_liveness(state: &GatewayState) -> ApiResponse {
    ApiResponse::ok(json!({
        "status": "ready",
        "version": state.version,
        "uptime_ms": state.uptime_ms(),
    }))
}

/// Handle `GET /readiness`: the document store must answer.
pub async fn handle_readiness(state: &GatewayState) -> HandlerResult {
    match state.documents.ping().await {
        Ok(()) => Ok(ApiResponse::ok(json!({
            "status": "ready",
            "version": state.version,
        }))),
        Err(e) => {
            warn!(error = %e, "Document store is not reachable");
            Err(ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Document store is not reachable",
            ))
        }
    }
}

/// Handle `GET /api/v1`.
pub fn handle_api_v1(state: &GatewayState) -> ApiResponse {
    ApiResponse::ok(json!({
        "paths": API_V1_ROUTES,
        "version": state.version,
    }))
}

/// Response for unknown routes.
pub fn not_found() -> ApiError {
    ApiError::not_found("Requested endpoint was not found")
}
