// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency advice for Python application stacks.
//!
//! Besides the usual dispatch, advice supports callbacks: when a request is
//! answered from the cache, an in-flight cached item gets the callback
//! registered while a finished one has its result delivered right away.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use stacklens_core::auth::authenticate;
use stacklens_core::dispatch::DispatchRequest;
use stacklens_core::{Fingerprint, WorkKind};

use super::status::result_body;
use super::{ApiResponse, GatewayState, HandlerResult};
use crate::callback::CallbackInfo;
use crate::error::ApiError;
use crate::params::{
    ApplicationStack, Constraint, RecommendationType, RuntimeEnvironment, normalize_library_usage,
    normalize_source_type, parse_constraints, validate_callback_url,
};

/// Query of `POST /advise/python`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdviceQuery {
    /// Kind of advice (`latest`, `stable`, `testing`, `performance`, `security`).
    #[serde(default)]
    pub recommendation_type: Option<String>,
    /// Source of the request (`cli`, `github-app`, ...); upper-cased.
    #[serde(default)]
    pub source_type: Option<String>,
    /// Run the adviser in debug mode.
    #[serde(default)]
    pub debug: bool,
    /// Bypass the dedup cache.
    #[serde(default)]
    pub force: bool,
    /// Include development dependencies.
    #[serde(default)]
    pub dev: bool,
    /// Origin of the request.
    #[serde(default)]
    pub origin: Option<String>,
    /// Shared secret unlocking protected fields.
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of `POST /advise/python`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdviceBody {
    /// Application stack to advise on.
    #[serde(default)]
    pub application_stack: Option<Value>,
    /// Justification of the request.
    #[serde(default)]
    pub justification: Option<Value>,
    /// Stack information.
    #[serde(default)]
    pub stack_info: Option<Value>,
    /// Metadata of the integration that sent the request. Protected.
    #[serde(default)]
    pub integration_metadata: Option<Value>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: Option<Value>,
    /// Where to deliver the result once ready.
    #[serde(default)]
    pub callback_info: Option<Value>,
    /// Runtime environment of the application.
    #[serde(default)]
    pub runtime_environment: Option<Value>,
    /// Additional version constraints, one per line.
    #[serde(default)]
    pub constraints: Option<String>,
    /// Library usage report of the application sources.
    #[serde(default)]
    pub library_usage: Option<Value>,
}

/// A validated, normalized advice request.
#[derive(Debug, Clone, PartialEq)]
pub struct AdviceRequest {
    application_stack: ApplicationStack,
    runtime_environment: RuntimeEnvironment,
    constraints: Vec<Constraint>,
    library_usage: Option<Value>,
    recommendation_type: Option<RecommendationType>,
    source_type: Option<String>,
    dev: bool,
    debug: bool,
    origin: Option<String>,
    authenticated: bool,
    justification: Option<Value>,
    stack_info: Option<Value>,
    integration_metadata: Option<Value>,
    labels: Option<Value>,
    callback_info: Option<CallbackInfo>,
}

impl AdviceRequest {
    /// Whether the request carried a valid token.
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Callback requested by the client.
    pub fn callback_info(&self) -> Option<&CallbackInfo> {
        self.callback_info.as_ref()
    }

    fn project(&self) -> Value {
        json!({
            "requirements": self.application_stack.requirements,
            "requirements_lock": self.application_stack.requirements_lock,
            "requirements_format": self.application_stack.requirements_format,
            "runtime_environment": self.runtime_environment,
            "constraints": self.constraints,
        })
    }

    /// Parameters echoed to the client and recorded for auditing.
    pub fn parameters(&self) -> Value {
        json!({
            "application_stack": self.application_stack,
            "runtime_environment": self.runtime_environment,
            "constraints": self.constraints,
            "library_usage": self.library_usage,
            "recommendation_type": self.recommendation_type,
            "source_type": self.source_type,
            "dev": self.dev,
            "debug": self.debug,
            "origin": self.origin,
            "justification": self.justification,
            "stack_info": self.stack_info,
            "integration_metadata": self.integration_metadata,
            "labels": self.labels,
            "callback_info": self.callback_info.as_ref().map(CallbackInfo::redacted),
        })
    }
}

impl DispatchRequest for AdviceRequest {
    const KIND: WorkKind = WorkKind::Advice;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        if self.authenticated {
            Fingerprint::of(&json!({
                "project": self.project(),
                "library_usage": self.library_usage,
                "recommendation_type": self.recommendation_type,
                "origin": self.origin,
                "source_type": self.source_type,
                "dev": self.dev,
                "debug": self.debug,
                "integration_metadata": self.integration_metadata,
                "labels": self.labels,
                "authenticated": true,
            }))
        } else {
            Fingerprint::of(&json!({
                "project": self.project(),
                "library_usage": self.library_usage,
                "recommendation_type": self.recommendation_type,
                "dev": self.dev,
                "debug": self.debug,
                "labels": self.labels,
            }))
        }
    }

    // Stack, environment, usage, labels and constraints travel through the
    // document store; callbacks are registered separately.
    fn message(&self) -> stacklens_core::Result<Value> {
        let mut message = self.parameters();
        if let Some(fields) = message.as_object_mut() {
            for field in [
                "application_stack",
                "runtime_environment",
                "library_usage",
                "labels",
                "constraints",
                "callback_info",
            ] {
                fields.remove(field);
            }
            fields.insert("authenticated".to_string(), json!(self.authenticated));
        }
        Ok(message)
    }

    fn audit_record(&self) -> stacklens_core::Result<Value> {
        Ok(self.parameters())
    }
}

fn parse_callback_info(value: Option<Value>) -> Result<Option<CallbackInfo>, String> {
    let callback: CallbackInfo = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => serde_json::from_value(value).map_err(|e| e.to_string())?,
    };
    validate_callback_url(&callback.url)?;
    Ok(Some(callback))
}

/// Validate and normalize an advice request.
pub fn build_request(
    state: &GatewayState,
    query: AdviceQuery,
    body: AdviceBody,
) -> Result<AdviceRequest, ApiError> {
    let authentication = authenticate(
        query.token.as_deref(),
        state.settings.api_token.as_deref(),
        &[("integration_metadata", body.integration_metadata.is_some())],
    )?;

    let echoed = json!({
        "recommendation_type": query.recommendation_type,
        "source_type": query.source_type,
        "dev": query.dev,
        "debug": query.debug,
        "origin": query.origin,
        "labels": body.labels,
    });
    let invalid = |message: String| ApiError::bad_request(message).with_parameters(echoed.clone());

    let recommendation_type = query
        .recommendation_type
        .as_deref()
        .map(RecommendationType::parse)
        .transpose()
        .map_err(invalid)?;

    let callback_info = parse_callback_info(body.callback_info)
        .map_err(|e| invalid(format!("Invalid callback information supplied: {}", e)))?;

    let runtime_environment = RuntimeEnvironment::parse(body.runtime_environment)
        .map_err(|e| invalid(format!("Failed to parse runtime environment: {}", e)))?;

    let constraints = parse_constraints(body.constraints.as_deref().unwrap_or_default())
        .map_err(|e| invalid(format!("Invalid constraints supplied: {}", e)))?;

    let application_stack = ApplicationStack::parse(body.application_stack, false)
        .map_err(|e| invalid(format!("Invalid application stack supplied: {}", e)))?;

    Ok(AdviceRequest {
        application_stack,
        runtime_environment,
        constraints,
        library_usage: normalize_library_usage(body.library_usage),
        recommendation_type,
        source_type: normalize_source_type(query.source_type.as_deref()),
        dev: query.dev,
        debug: query.debug,
        origin: query.origin,
        authenticated: authentication.is_authenticated(),
        justification: body.justification,
        stack_info: body.stack_info,
        integration_metadata: body.integration_metadata,
        labels: body.labels,
        callback_info,
    })
}

/// Handle `POST /advise/python`.
pub async fn handle_post_advise(state: &GatewayState, query: AdviceQuery, body: AdviceBody) -> HandlerResult {
    let force = query.force;
    let request = build_request(state, query, body)?;
    let outcome = state.advice.dispatch(&request, force).await?;

    info!(
        analysis_id = %outcome.analysis_id,
        cached = outcome.cached,
        authenticated = request.authenticated(),
        callback = request.callback_info().is_some(),
        "Advice accepted"
    );

    if let Some(callback) = request.callback_info() {
        if outcome.cached {
            handle_cached_callback(state, &outcome.analysis_id, callback).await;
        } else {
            register_callback(state, &outcome.analysis_id, callback).await;
        }
    }

    Ok(ApiResponse::accepted(json!({
        "analysis_id": outcome.analysis_id,
        "cached": outcome.cached,
        "authenticated": request.authenticated(),
        "parameters": request.parameters(),
    })))
}

async fn register_callback(state: &GatewayState, analysis_id: &str, callback: &CallbackInfo) {
    if let Err(e) = state.callbacks.register(analysis_id, callback).await {
        error!(analysis_id = %analysis_id, error = %e, "Failed to register callback");
    }
}

/// Deliver the result of a terminal cached item (including one that is no
/// longer found), or register the callback for an item still in flight.
async fn handle_cached_callback(state: &GatewayState, analysis_id: &str, callback: &CallbackInfo) {
    let reconciliation = match state.reconciler(WorkKind::Advice) {
        Ok(reconciler) => reconciler.result(analysis_id).await,
        Err(_) => return,
    };

    let reconciliation = match reconciliation {
        Ok(reconciliation) => reconciliation,
        Err(e) => {
            warn!(
                analysis_id = %analysis_id,
                error = %e,
                "Could not reconcile cached advice, registering callback"
            );
            register_callback(state, analysis_id, callback).await;
            return;
        }
    };

    if !reconciliation.state.is_terminal() {
        register_callback(state, analysis_id, callback).await;
        return;
    }

    let body = json!({
        "result": result_body(WorkKind::Advice, &reconciliation),
        "client_data": callback.client_data,
    });
    match state.notifier.notify(callback, &body).await {
        Ok(()) => info!(
            analysis_id = %analysis_id,
            state = ?reconciliation.state,
            "Cached advice delivered to callback"
        ),
        Err(e) => error!(
            analysis_id = %analysis_id,
            url = %callback.url,
            error = %e,
            "Failed to deliver callback"
        ),
    }
}
