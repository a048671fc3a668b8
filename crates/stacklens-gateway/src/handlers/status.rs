// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result, status, log and list endpoints shared by every kind of work.

use serde_json::{Value, json};
use std::collections::BTreeMap;

use stacklens_core::{Reconciliation, WorkKind, WorkState};

use super::{ApiResponse, GatewayState, HandlerResult, id_parameters};
use crate::pagination::{PageRequest, Pagination};

/// Remove per-argument request metadata (origin, integration details) from a
/// result document.
pub fn strip_request_metadata(document: &mut Value) {
    if let Some(arguments) = document
        .pointer_mut("/metadata/arguments")
        .and_then(Value::as_object_mut)
    {
        for argument in arguments.values_mut() {
            if let Some(argument) = argument.as_object_mut() {
                argument.remove("metadata");
            }
        }
    }
}

/// Body of the result endpoint, with request metadata stripped where the kind
/// carries it.
pub fn result_body(kind: WorkKind, reconciliation: &Reconciliation) -> Value {
    let mut body = reconciliation.result_payload();
    if reconciliation.state == WorkState::Succeeded
        && matches!(kind, WorkKind::Advice | WorkKind::Provenance)
    {
        strip_request_metadata(&mut body);
    }
    body
}

/// Handle `GET /<kind>/{id}`.
pub async fn handle_get_result(state: &GatewayState, kind: WorkKind, analysis_id: &str) -> HandlerResult {
    let reconciliation = state.reconciler(kind)?.result(analysis_id).await?;
    Ok(ApiResponse::with_code(
        reconciliation.http_status(),
        result_body(kind, &reconciliation),
    ))
}

/// Handle `GET /<kind>/{id}/status`.
pub async fn handle_get_status(state: &GatewayState, kind: WorkKind, analysis_id: &str) -> HandlerResult {
    let reconciliation = state.reconciler(kind)?.status(analysis_id).await?;
    Ok(ApiResponse::with_code(
        reconciliation.http_status(),
        reconciliation.status_payload(),
    ))
}

/// Handle `GET /<kind>/{id}/log`.
pub async fn handle_get_log(state: &GatewayState, kind: WorkKind, analysis_id: &str) -> HandlerResult {
    let log = state.reconciler(kind)?.log(analysis_id).await?;

    Ok(match log {
        Some(log) => ApiResponse::ok(json!({
            "log": log,
            "parameters": id_parameters(analysis_id),
        })),
        None => ApiResponse::with_code(
            404,
            json!({
                "error": format!(
                    "Log for analysis {} was not found or it has not started yet",
                    analysis_id
                ),
                "parameters": id_parameters(analysis_id),
            }),
        ),
    })
}

/// Handle `GET /<kind>`: dispatched work items, newest first.
pub async fn handle_list(
    state: &GatewayState,
    kind: WorkKind,
    path: &str,
    args: &BTreeMap<String, String>,
) -> HandlerResult {
    let request = PageRequest::from_args(args, &state.settings)?;
    let reconciler = state.reconciler(kind)?;

    // Count first so negative pages can be resolved.
    let (entries_count, _) = reconciler.list(0, 0).await?;
    let pagination = Pagination::new(request, entries_count, path, args);
    let (_, entries) = reconciler
        .list(pagination.offset(), u64::from(pagination.per_page))
        .await?;

    let analyses: Vec<Value> = entries
        .into_iter()
        .map(|entry| {
            json!({
                "analysis_id": entry.document_id,
                "created_at": entry.created_at,
                "parameters": entry.body,
            })
        })
        .collect();

    let headers = pagination.headers();
    Ok(ApiResponse::ok(json!({
        "analyses": analyses,
        "parameters": {
            "page": pagination.page,
            "per_page": pagination.per_page,
        },
        "pagination": pagination,
    }))
    .with_headers(headers))
}
