// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provenance checks of Python application stacks.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use stacklens_core::auth::authenticate;
use stacklens_core::dispatch::DispatchRequest;
use stacklens_core::{Fingerprint, WorkKind};

use super::{ApiResponse, GatewayState, HandlerResult};
use crate::error::ApiError;
use crate::params::ApplicationStack;

/// Query of `POST /provenance/python`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvenanceQuery {
    /// Run the checker in debug mode.
    #[serde(default)]
    pub debug: bool,
    /// Bypass the dedup cache.
    #[serde(default)]
    pub force: bool,
    /// Origin of the request.
    #[serde(default)]
    pub origin: Option<String>,
    /// Shared secret unlocking protected fields.
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of `POST /provenance/python`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvenanceBody {
    /// Application stack to check; the lock file is required.
    #[serde(default)]
    pub application_stack: Option<Value>,
    /// Justification of the check.
    #[serde(default)]
    pub justification: Option<Value>,
    /// Stack information.
    #[serde(default)]
    pub stack_info: Option<Value>,
    /// Metadata of the integration that sent the request. Protected.
    #[serde(default)]
    pub integration_metadata: Option<Value>,
}

/// A validated provenance check request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceRequest {
    application_stack: ApplicationStack,
    debug: bool,
    origin: Option<String>,
    authenticated: bool,
    justification: Option<Value>,
    stack_info: Option<Value>,
    integration_metadata: Option<Value>,
    index_urls: Vec<String>,
}

impl ProvenanceRequest {
    /// Whether the request carried a valid token.
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    fn project(&self) -> Value {
        json!({
            "requirements": self.application_stack.requirements,
            "requirements_lock": self.application_stack.requirements_lock,
            "requirements_format": self.application_stack.requirements_format,
        })
    }

    /// Parameters echoed to the client and recorded for auditing.
    pub fn parameters(&self) -> Value {
        json!({
            "application_stack": self.application_stack,
            "debug": self.debug,
            "origin": self.origin,
            "justification": self.justification,
            "stack_info": self.stack_info,
            "integration_metadata": self.integration_metadata,
            "index_urls": self.index_urls,
        })
    }
}

impl DispatchRequest for ProvenanceRequest {
    const KIND: WorkKind = WorkKind::Provenance;

    fn fingerprint(&self) -> stacklens_core::Result<Fingerprint> {
        if self.authenticated {
            Fingerprint::of(&json!({
                "project": self.project(),
                "origin": self.origin,
                "index_urls": self.index_urls,
                "debug": self.debug,
                "authenticated": true,
            }))
        } else {
            Fingerprint::of(&json!({
                "project": self.project(),
                "index_urls": self.index_urls,
                "debug": self.debug,
            }))
        }
    }

    // The application stack travels through the document store, not the bus.
    fn message(&self) -> stacklens_core::Result<Value> {
        let mut message = self.parameters();
        if let Some(fields) = message.as_object_mut() {
            fields.remove("application_stack");
            fields.insert("authenticated".to_string(), json!(self.authenticated));
        }
        Ok(message)
    }

    fn audit_record(&self) -> stacklens_core::Result<Value> {
        Ok(self.parameters())
    }
}

/// Handle `POST /provenance/python`.
pub async fn handle_post_provenance(
    state: &GatewayState,
    query: ProvenanceQuery,
    body: ProvenanceBody,
) -> HandlerResult {
    let authentication = authenticate(
        query.token.as_deref(),
        state.settings.api_token.as_deref(),
        &[("integration_metadata", body.integration_metadata.is_some())],
    )?;

    let echoed = json!({
        "debug": query.debug,
        "origin": query.origin,
        "justification": body.justification,
        "stack_info": body.stack_info,
        "integration_metadata": body.integration_metadata,
    });
    let application_stack = ApplicationStack::parse(body.application_stack, true).map_err(|e| {
        ApiError::bad_request(format!("Invalid application stack supplied: {}", e))
            .with_parameters(echoed)
    })?;

    let request = ProvenanceRequest {
        application_stack,
        debug: query.debug,
        origin: query.origin,
        authenticated: authentication.is_authenticated(),
        justification: body.justification,
        stack_info: body.stack_info,
        integration_metadata: body.integration_metadata,
        index_urls: state.settings.package_indexes.clone(),
    };
    let outcome = state.provenance.dispatch(&request, query.force).await?;

    info!(
        analysis_id = %outcome.analysis_id,
        cached = outcome.cached,
        authenticated = request.authenticated(),
        "Provenance check accepted"
    );

    Ok(ApiResponse::accepted(json!({
        "analysis_id": outcome.analysis_id,
        "cached": outcome.cached,
        "authenticated": request.authenticated(),
        "parameters": request.parameters(),
    })))
}
