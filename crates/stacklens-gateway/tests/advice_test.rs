// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advice and provenance over HTTP: authentication, input validation,
//! dedup expiry and callbacks.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Duration;
use common::{TOKEN, TestGateway};
use serde_json::{Value, json};
use stacklens_core::WorkKind;
use stacklens_core::dispatch::DispatchRequest;
use stacklens_core::store::DocumentStore;
use stacklens_gateway::callback::CALLBACKS_COLLECTION;
use stacklens_gateway::handlers::advice::{AdviceBody, AdviceQuery, build_request};

fn advice_body() -> Value {
    json!({
        "application_stack": {
            "requirements": "[packages]\nflask = \"*\"\n",
            "requirements_format": "pipenv",
        },
        "runtime_environment": {
            "operating_system": {"name": "fedora", "version": "39"},
            "python_version": "3.12",
        },
    })
}

fn provenance_body() -> Value {
    json!({
        "application_stack": {
            "requirements": "[packages]\nflask = \"*\"\n",
            "requirements_lock": "{\"default\": {}}",
        },
    })
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn protected_field_without_token_is_rejected() {
    let gw = TestGateway::new();
    let mut body = advice_body();
    body["integration_metadata"] = json!({"installation": 42});

    let response = gw.post("/api/v1/advise/python", body).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.body["error"],
        "Parameter 'integration_metadata' requires token to be set to perform authenticated request"
    );
    assert_eq!(gw.published(), 0);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let gw = TestGateway::new();

    let response = gw
        .post("/api/v1/advise/python?token=nope", advice_body())
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "Bad token supplied");
    assert_eq!(gw.published(), 0);
}

#[tokio::test]
async fn bearer_token_authenticates() {
    let gw = TestGateway::new();
    let mut body = advice_body();
    body["integration_metadata"] = json!({"installation": 42});

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/advise/python")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", TOKEN))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = gw.send(request).await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["authenticated"], true);
}

#[tokio::test]
async fn authenticated_and_anonymous_requests_do_not_share_work() {
    let gw = TestGateway::new();

    let anonymous = gw.post("/api/v1/advise/python", advice_body()).await;
    let authenticated = gw
        .post(&format!("/api/v1/advise/python?token={}", TOKEN), advice_body())
        .await;

    assert_eq!(anonymous.body["authenticated"], false);
    assert_eq!(authenticated.body["authenticated"], true);
    assert_eq!(authenticated.body["cached"], false);
    assert_ne!(anonymous.body["analysis_id"], authenticated.body["analysis_id"]);
    assert_eq!(gw.published(), 2);
}

// ============================================================================
// Dedup
// ============================================================================

#[tokio::test]
async fn advice_is_cached_until_expiry() {
    let gw = TestGateway::new();

    let first = gw.post("/api/v1/advise/python", advice_body()).await;
    assert_eq!(first.status, StatusCode::ACCEPTED);
    assert!(first.body["analysis_id"].as_str().unwrap().starts_with("adviser-"));

    gw.clock.advance(Duration::hours(2));
    let cached = gw.post("/api/v1/advise/python", advice_body()).await;
    assert_eq!(cached.body["cached"], true);
    assert_eq!(cached.body["analysis_id"], first.body["analysis_id"]);
    assert_eq!(gw.published(), 1);

    gw.clock.advance(Duration::hours(1));
    let expired = gw.post("/api/v1/advise/python", advice_body()).await;
    assert_eq!(expired.body["cached"], false);
    assert_ne!(expired.body["analysis_id"], first.body["analysis_id"]);
    assert_eq!(gw.published(), 2);
}

#[tokio::test]
async fn equivalent_inputs_share_work() {
    let gw = TestGateway::new();

    let mut first = advice_body();
    first["constraints"] = json!("numpy>=1.0\nFlask_Login\n");
    first["library_usage"] = json!({"report": {"flask": ["flask.Flask", "flask.abort"]}});

    let mut second = advice_body();
    second["constraints"] = json!("# pinned\nflask-login\nnumpy >= 1.0\n");
    second["library_usage"] = json!({"report": {"flask": ["flask.abort", "flask.Flask"]}});
    second["runtime_environment"]["hardware"] = Value::Null;

    let a = gw.post("/api/v1/advise/python", first).await;
    let b = gw.post("/api/v1/advise/python", second).await;

    assert_eq!(a.status, StatusCode::ACCEPTED);
    assert_eq!(b.body["cached"], true);
    assert_eq!(b.body["analysis_id"], a.body["analysis_id"]);
}

#[tokio::test]
async fn message_carries_envelope_without_documents() {
    let gw = TestGateway::new();

    let response = gw
        .post("/api/v1/advise/python?recommendation_type=security&source_type=cli", advice_body())
        .await;
    let id = response.body["analysis_id"].as_str().unwrap();

    let message = &gw.publisher.messages_on("test.adviser-trigger")[0];
    assert_eq!(message["job_id"], id);
    assert_eq!(message["component_name"], "stacklens-gateway");
    assert_eq!(message["recommendation_type"], "security");
    assert_eq!(message["source_type"], "CLI");
    assert_eq!(message["authenticated"], false);
    assert!(message.get("application_stack").is_none());
    assert!(message.get("runtime_environment").is_none());
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn invalid_inputs_are_rejected_before_dispatch() {
    let gw = TestGateway::new();

    let unknown_type = gw
        .post("/api/v1/advise/python?recommendation_type=fastest", advice_body())
        .await;
    assert_eq!(unknown_type.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown_type.body["error"], "Unknown recommendation type 'fastest'");

    let mut body = advice_body();
    body["runtime_environment"]["gpu"] = json!("yes");
    let environment = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(environment.status, StatusCode::BAD_REQUEST);
    assert!(
        environment.body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to parse runtime environment:")
    );

    let mut body = advice_body();
    body["constraints"] = json!("flask>=1\nflask<3\n");
    let constraints = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(constraints.status, StatusCode::BAD_REQUEST);
    assert!(
        constraints.body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid constraints supplied:")
    );

    let mut body = advice_body();
    body["callback_info"] = json!({"url": "not a url"});
    let callback = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(callback.status, StatusCode::BAD_REQUEST);

    let missing_stack = gw.post("/api/v1/advise/python", json!({})).await;
    assert_eq!(missing_stack.status, StatusCode::BAD_REQUEST);

    assert_eq!(gw.published(), 0);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let gw = TestGateway::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/advise/python")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = gw.send(request).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn id_of_another_kind_is_rejected() {
    let gw = TestGateway::new();

    let response = gw.get("/api/v1/advise/python/foo-123/status").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Wrong analysis id provided");
    assert_eq!(response.body["parameters"]["analysis_id"], "foo-123");

    let response = gw
        .get("/api/v1/advise/python/package-extract-0000000000000001")
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(gw.orchestrator.status_queries(), 0);
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn callback_is_registered_for_new_work() {
    let gw = TestGateway::new();
    let mut body = advice_body();
    body["callback_info"] = json!({
        "url": "https://hooks.example.com/advice",
        "authorization": "Bearer hook-secret",
        "client_data": {"pr": 7},
    });

    let response = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["parameters"]["callback_info"]["authorization"], "***");

    let id = response.body["analysis_id"].as_str().unwrap();
    let registered = gw.state.callbacks.registered(id).await.unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].url, "https://hooks.example.com/advice");
    assert!(gw.notifier.deliveries().is_empty());

    let message = &gw.publisher.messages_on("test.adviser-trigger")[0];
    assert!(!message.to_string().contains("hook-secret"));
    let audit = gw
        .documents
        .retrieve_document(&WorkKind::Advice.requests_collection(), id)
        .await
        .unwrap()
        .unwrap();
    assert!(!audit.to_string().contains("hook-secret"));
}

#[tokio::test]
async fn cached_finished_advice_is_delivered_immediately() {
    let gw = TestGateway::new();

    let first = gw.post("/api/v1/advise/python", advice_body()).await;
    let id = first.body["analysis_id"].as_str().unwrap().to_string();
    let document = json!({
        "metadata": {"arguments": {"adviser": {"metadata": {"origin": "x"}, "limit": 1}}},
        "result": {"report": []},
    });
    gw.documents
        .store_document(&WorkKind::Advice.results_collection(), &id, &document)
        .await
        .unwrap();

    let mut body = advice_body();
    body["callback_info"] = json!({
        "url": "https://hooks.example.com/advice",
        "client_data": {"pr": 7},
    });
    let cached = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(cached.body["cached"], true);

    let deliveries = gw.notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (callback, payload) = &deliveries[0];
    assert_eq!(callback.url, "https://hooks.example.com/advice");
    assert_eq!(payload["client_data"], json!({"pr": 7}));
    assert_eq!(payload["result"]["result"], json!({"report": []}));
    assert_eq!(
        payload["result"]["metadata"]["arguments"]["adviser"],
        json!({"limit": 1})
    );
    assert!(gw.documents.ids(CALLBACKS_COLLECTION).is_empty());
}

#[tokio::test]
async fn cached_running_advice_registers_the_callback() {
    let gw = TestGateway::new();

    let first = gw.post("/api/v1/advise/python", advice_body()).await;
    let id = first.body["analysis_id"].as_str().unwrap().to_string();
    gw.orchestrator.set_phase(&id, "running");

    let mut body = advice_body();
    body["callback_info"] = json!({"url": "https://hooks.example.com/advice"});
    let cached = gw.post("/api/v1/advise/python", body).await;

    assert_eq!(cached.body["cached"], true);
    assert!(gw.notifier.deliveries().is_empty());
    assert_eq!(gw.state.callbacks.registered(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cached_advice_that_vanished_is_delivered_as_not_found() {
    let gw = TestGateway::new();

    let mut body = advice_body();
    body["callback_info"] = json!({"url": "https://hooks.example.com/advice"});
    let query: AdviceQuery = serde_json::from_value(json!({})).unwrap();
    let request = build_request(
        &gw.state,
        query,
        serde_json::from_value::<AdviceBody>(body.clone()).unwrap(),
    )
    .unwrap();
    let fingerprint = request.fingerprint().unwrap();
    gw.state
        .advice
        .remember(&fingerprint, "adviser-00000000000000aa")
        .await;

    let cached = gw.post("/api/v1/advise/python", body).await;
    assert_eq!(cached.status, StatusCode::ACCEPTED);
    assert_eq!(cached.body["cached"], true);
    assert_eq!(cached.body["analysis_id"], "adviser-00000000000000aa");

    let deliveries = gw.notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(
        deliveries[0].1["result"]["parameters"]["analysis_id"],
        "adviser-00000000000000aa"
    );
    assert!(deliveries[0].1["result"]["error"].is_string());
    assert!(
        gw.state
            .callbacks
            .registered("adviser-00000000000000aa")
            .await
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// Results and listing
// ============================================================================

#[tokio::test]
async fn succeeded_advice_has_request_metadata_stripped() {
    let gw = TestGateway::new();
    let response = gw.post("/api/v1/advise/python", advice_body()).await;
    let id = response.body["analysis_id"].as_str().unwrap().to_string();

    gw.documents
        .store_document(
            &WorkKind::Advice.results_collection(),
            &id,
            &json!({"metadata": {"arguments": {"stacklens": {"metadata": {"token": "t"}}}}}),
        )
        .await
        .unwrap();

    let result = gw.get(&format!("/api/v1/advise/python/{}", id)).await;
    assert_eq!(result.status, StatusCode::OK);
    assert_eq!(result.body["metadata"]["arguments"]["stacklens"], json!({}));
}

#[tokio::test]
async fn listing_is_paginated_newest_first() {
    let gw = TestGateway::new();
    let mut ids = Vec::new();
    for python in ["3.9", "3.10", "3.11"] {
        let mut body = advice_body();
        body["runtime_environment"]["python_version"] = json!(python);
        let response = gw.post("/api/v1/advise/python", body).await;
        ids.push(response.body["analysis_id"].as_str().unwrap().to_string());
    }

    let page = gw.get("/api/v1/advise/python?per_page=2").await;
    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(page.body["pagination"]["entries_count"], 3);
    assert_eq!(page.body["pagination"]["page_count"], 2);
    assert_eq!(page.body["analyses"][0]["analysis_id"], ids[2].as_str());
    assert_eq!(page.body["analyses"][1]["analysis_id"], ids[1].as_str());

    assert_eq!(page.header("page_count"), Some("2"));
    assert_eq!(page.header("entries_count"), Some("3"));
    assert!(page.header("link").unwrap().contains("rel=\"next\""));

    let last = gw.get("/api/v1/advise/python?per_page=2&page=-1").await;
    assert_eq!(last.body["analyses"].as_array().unwrap().len(), 1);
    assert_eq!(last.body["analyses"][0]["analysis_id"], ids[0].as_str());

    let invalid = gw.get("/api/v1/advise/python?per_page=0").await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn extreme_pages_are_answered() {
    let gw = TestGateway::new();

    let empty = gw
        .get(&format!("/api/v1/advise/python?page={}", i64::MIN))
        .await;
    assert_eq!(empty.status, StatusCode::OK);
    assert_eq!(empty.body["pagination"]["entries_count"], 0);

    let submitted = gw.post("/api/v1/advise/python", advice_body()).await;

    let last = gw
        .get(&format!("/api/v1/advise/python?page={}", i64::MIN))
        .await;
    assert_eq!(last.status, StatusCode::OK);
    assert_eq!(last.body["analyses"][0]["analysis_id"], submitted.body["analysis_id"]);

    let beyond = gw
        .get(&format!("/api/v1/advise/python?page={}", i64::MAX))
        .await;
    assert_eq!(beyond.status, StatusCode::OK);
    assert!(beyond.body["analyses"].as_array().unwrap().is_empty());
    assert_eq!(beyond.body["pagination"]["page_count"], 1);
}

// ============================================================================
// Provenance
// ============================================================================

#[tokio::test]
async fn provenance_requires_a_lock_file() {
    let gw = TestGateway::new();

    let response = gw
        .post(
            "/api/v1/provenance/python",
            json!({"application_stack": {"requirements": "flask\n"}}),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(
        response.body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid application stack supplied:")
    );
    assert_eq!(gw.published(), 0);
}

#[tokio::test]
async fn provenance_check_is_deduplicated() {
    let gw = TestGateway::new();

    let first = gw.post("/api/v1/provenance/python", provenance_body()).await;
    assert_eq!(first.status, StatusCode::ACCEPTED);
    let id = first.body["analysis_id"].as_str().unwrap().to_string();
    assert!(id.starts_with("provenance-checker-"));
    assert_eq!(
        first.body["parameters"]["index_urls"],
        json!(["https://pypi.org/simple"])
    );

    let second = gw.post("/api/v1/provenance/python", provenance_body()).await;
    assert_eq!(second.body["cached"], true);
    assert_eq!(gw.published(), 1);

    let status = gw.get(&format!("/api/v1/provenance/python/{}/status", id)).await;
    assert_eq!(status.status, StatusCode::ACCEPTED);

    gw.orchestrator.set_phase(&id, "pending");
    let scheduled = gw.get(&format!("/api/v1/provenance/python/{}", id)).await;
    assert_eq!(scheduled.status, StatusCode::ACCEPTED);
    assert_eq!(scheduled.body["error"], "Analysis is being scheduled");
}
