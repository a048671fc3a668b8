// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP router.
//!
//! Extracts requests and hands them to [`crate::handlers`]. Malformed query
//! strings and bodies are answered with a JSON 400 like every other client
//! error.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Uri, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use stacklens_core::WorkKind;

use crate::error::ApiError;
use crate::handlers::advice::{AdviceBody, AdviceQuery, handle_post_advise};
use crate::handlers::analysis::{
    AnalyzeBody, ImageMetadataBody, handle_get_analyze_by_hash, handle_post_analyze,
    handle_post_image_metadata,
};
use crate::handlers::build::{
    BuildBody, ForceQuery, RepoInitBody, handle_get_buildlog, handle_post_build,
    handle_post_repo_init,
};
use crate::handlers::misc::{handle_api_v1, handle_liveness, handle_readiness, not_found};
use crate::handlers::provenance::{ProvenanceBody, ProvenanceQuery, handle_post_provenance};
use crate::handlers::status::{handle_get_log, handle_get_result, handle_get_status, handle_list};
use crate::handlers::{ApiResponse, GatewayState, HandlerResult};

/// Header carrying the gateway version on every response.
pub const VERSION_HEADER: &str = "x-stacklens-version";

type SharedState = State<Arc<GatewayState>>;

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .route("/api/v1", get(api_v1))
        // Image analysis
        .route("/api/v1/analyze", post(post_analyze).get(list_analyses))
        .route("/api/v1/analyze/{analysis_id}", get(analysis_result))
        .route("/api/v1/analyze/{analysis_id}/status", get(analysis_status))
        .route("/api/v1/analyze/{analysis_id}/log", get(analysis_log))
        .route("/api/v1/analyze/by-hash/{image_hash}", get(analysis_by_hash))
        .route("/api/v1/image/metadata", post(post_image_metadata))
        // Provenance
        .route(
            "/api/v1/provenance/python",
            post(post_provenance).get(list_provenance),
        )
        .route("/api/v1/provenance/python/{analysis_id}", get(provenance_result))
        .route(
            "/api/v1/provenance/python/{analysis_id}/status",
            get(provenance_status),
        )
        .route("/api/v1/provenance/python/{analysis_id}/log", get(provenance_log))
        // Advice
        .route("/api/v1/advise/python", post(post_advise).get(list_advice))
        .route("/api/v1/advise/python/{analysis_id}", get(advice_result))
        .route("/api/v1/advise/python/{analysis_id}/status", get(advice_status))
        .route("/api/v1/advise/python/{analysis_id}/log", get(advice_log))
        // Builds and repositories
        .route("/api/v1/build", post(post_build).get(list_builds))
        .route("/api/v1/build/{analysis_id}", get(build_result))
        .route("/api/v1/build/{analysis_id}/status", get(build_status))
        .route("/api/v1/build/{analysis_id}/log", get(build_log))
        .route("/api/v1/buildlog/{document_id}", get(get_buildlog))
        .route("/api/v1/repo/init", post(post_repo_init))
        .fallback(fallback)
        .layer(middleware::map_response(add_version_header))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until `shutdown_rx` turns true.
pub async fn run_gateway_server_with_shutdown(
    bind_addr: SocketAddr,
    state: Arc<GatewayState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Gateway HTTP server starting");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Gateway HTTP server stopped");
    Ok(())
}

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

// ============================================================================
// Extraction helpers
// ============================================================================

fn query<T: DeserializeOwned>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(query)| query)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn body<T: DeserializeOwned>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

// ============================================================================
// Health checks
// ============================================================================

async fn liveness(State(state): SharedState) -> ApiResponse {
    handle_liveness(&state)
}

async fn readiness(State(state): SharedState) -> HandlerResult {
    handle_readiness(&state).await
}

async fn api_v1(State(state): SharedState) -> ApiResponse {
    handle_api_v1(&state)
}

async fn fallback() -> ApiError {
    not_found()
}

// ============================================================================
// Listing
// ============================================================================

async fn list(
    state: &GatewayState,
    kind: WorkKind,
    uri: &Uri,
    args: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> HandlerResult {
    let args = query(args)?;
    handle_list(state, kind, uri.path(), &args).await
}

// ============================================================================
// Image analysis
// ============================================================================

async fn post_analyze(
    State(state): SharedState,
    force: Result<Query<ForceQuery>, QueryRejection>,
    analyze: Result<Json<AnalyzeBody>, JsonRejection>,
) -> HandlerResult {
    let force = query(force)?.force;
    handle_post_analyze(&state, body(analyze)?, force).await
}

async fn list_analyses(
    State(state): SharedState,
    uri: Uri,
    args: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> HandlerResult {
    list(&state, WorkKind::Analysis, &uri, args).await
}

async fn analysis_result(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_result(&state, WorkKind::Analysis, &id).await
}

async fn analysis_status(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_status(&state, WorkKind::Analysis, &id).await
}

async fn analysis_log(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_log(&state, WorkKind::Analysis, &id).await
}

async fn analysis_by_hash(State(state): SharedState, Path(image_hash): Path<String>) -> HandlerResult {
    handle_get_analyze_by_hash(&state, &image_hash).await
}

async fn post_image_metadata(
    State(state): SharedState,
    metadata: Result<Json<ImageMetadataBody>, JsonRejection>,
) -> HandlerResult {
    handle_post_image_metadata(&state, body(metadata)?).await
}

// ============================================================================
// Provenance
// ============================================================================

async fn post_provenance(
    State(state): SharedState,
    headers: HeaderMap,
    params: Result<Query<ProvenanceQuery>, QueryRejection>,
    provenance: Result<Json<ProvenanceBody>, JsonRejection>,
) -> HandlerResult {
    let mut params = query(params)?;
    if params.token.is_none() {
        params.token = bearer_token(&headers);
    }
    handle_post_provenance(&state, params, body(provenance)?).await
}

async fn list_provenance(
    State(state): SharedState,
    uri: Uri,
    args: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> HandlerResult {
    list(&state, WorkKind::Provenance, &uri, args).await
}

async fn provenance_result(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_result(&state, WorkKind::Provenance, &id).await
}

async fn provenance_status(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_status(&state, WorkKind::Provenance, &id).await
}

async fn provenance_log(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_log(&state, WorkKind::Provenance, &id).await
}

// ============================================================================
// Advice
// ============================================================================

async fn post_advise(
    State(state): SharedState,
    headers: HeaderMap,
    params: Result<Query<AdviceQuery>, QueryRejection>,
    advice: Result<Json<AdviceBody>, JsonRejection>,
) -> HandlerResult {
    let mut params = query(params)?;
    if params.token.is_none() {
        params.token = bearer_token(&headers);
    }
    handle_post_advise(&state, params, body(advice)?).await
}

async fn list_advice(
    State(state): SharedState,
    uri: Uri,
    args: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> HandlerResult {
    list(&state, WorkKind::Advice, &uri, args).await
}

async fn advice_result(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_result(&state, WorkKind::Advice, &id).await
}

async fn advice_status(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_status(&state, WorkKind::Advice, &id).await
}

async fn advice_log(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_log(&state, WorkKind::Advice, &id).await
}

// ============================================================================
// Builds and repositories
// ============================================================================

async fn post_build(
    State(state): SharedState,
    force: Result<Query<ForceQuery>, QueryRejection>,
    build: Result<Json<BuildBody>, JsonRejection>,
) -> HandlerResult {
    let force = query(force)?.force;
    handle_post_build(&state, body(build)?, force).await
}

async fn list_builds(
    State(state): SharedState,
    uri: Uri,
    args: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> HandlerResult {
    list(&state, WorkKind::BuildAnalysis, &uri, args).await
}

async fn build_result(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_result(&state, WorkKind::BuildAnalysis, &id).await
}

async fn build_status(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_status(&state, WorkKind::BuildAnalysis, &id).await
}

async fn build_log(State(state): SharedState, Path(id): Path<String>) -> HandlerResult {
    handle_get_log(&state, WorkKind::BuildAnalysis, &id).await
}

async fn get_buildlog(State(state): SharedState, Path(document_id): Path<String>) -> HandlerResult {
    handle_get_buildlog(&state, &document_id).await
}

async fn post_repo_init(
    State(state): SharedState,
    repo: Result<Json<RepoInitBody>, JsonRejection>,
) -> HandlerResult {
    handle_post_repo_init(&state, body(repo)?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_read_from_authorization() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers), Some("s3cret".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
