// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch protocol tests: dedup, expiry, force and failure handling.

mod common;

use chrono::Duration;
use common::{AdviceSample, Harness, ImageSample};
use serde_json::json;
use stacklens_core::{CacheLookup, CacheStore, DispatchRequest, WorkKind};
use stacklens_core::store::DocumentStore;

#[tokio::test]
async fn first_dispatch_publishes_caches_and_audits() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let outcome = dispatcher.dispatch(&request, false).await.unwrap();

    assert!(!outcome.cached);
    assert!(outcome.analysis_id.starts_with("adviser-"));
    assert_eq!(h.published(), 1);

    let message = &h.publisher.messages_on("test.adviser-trigger")[0];
    assert_eq!(message["job_id"], json!(outcome.analysis_id));
    assert_eq!(message["component_name"], "stacklens-test");
    assert_eq!(message["service_version"], "0.0.0-test");

    let fingerprint = request.fingerprint().unwrap();
    let record = h.cache.lookup(&fingerprint).await.unwrap().record().unwrap();
    assert_eq!(record.analysis_id, outcome.analysis_id);
    assert_eq!(record.timestamp, Some(h.clock_now()));

    let audit = h
        .documents
        .retrieve_document(&WorkKind::Advice.requests_collection(), &outcome.analysis_id)
        .await
        .unwrap();
    assert_eq!(audit, Some(request.message().unwrap()));
}

#[tokio::test]
async fn fresh_hit_returns_cached_id_without_publishing() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let first = dispatcher.dispatch(&request, false).await.unwrap();
    h.clock.advance(Duration::hours(2));
    let second = dispatcher.dispatch(&request, false).await.unwrap();

    assert!(second.cached);
    assert_eq!(second.analysis_id, first.analysis_id);
    assert_eq!(h.published(), 1);
}

#[tokio::test]
async fn stale_record_dispatches_new_work() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let first = dispatcher.dispatch(&request, false).await.unwrap();
    h.clock.advance(Duration::hours(3));
    let second = dispatcher.dispatch(&request, false).await.unwrap();

    assert!(!second.cached);
    assert_ne!(second.analysis_id, first.analysis_id);
    assert_eq!(h.published(), 2);

    // The newer dispatch now owns the fingerprint.
    let third = dispatcher.dispatch(&request, false).await.unwrap();
    assert!(third.cached);
    assert_eq!(third.analysis_id, second.analysis_id);
}

#[tokio::test]
async fn force_bypasses_lookup_and_overwrites_record() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let first = dispatcher.dispatch(&request, false).await.unwrap();
    let forced = dispatcher.dispatch(&request, true).await.unwrap();

    assert!(!forced.cached);
    assert_ne!(forced.analysis_id, first.analysis_id);
    assert_eq!(h.published(), 2);

    let record = h
        .cache
        .lookup(&request.fingerprint().unwrap())
        .await
        .unwrap()
        .record()
        .unwrap();
    assert_eq!(record.analysis_id, forced.analysis_id);
}

#[tokio::test]
async fn authenticated_and_anonymous_requests_do_not_share_work() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();

    let anonymous = AdviceSample::new("flask\n");
    let mut authenticated = AdviceSample::new("flask\n");
    authenticated.authenticated = true;
    authenticated.origin = Some("https://github.com/stacklens/demo".to_string());

    let a = dispatcher.dispatch(&anonymous, false).await.unwrap();
    let b = dispatcher.dispatch(&authenticated, false).await.unwrap();

    assert!(!b.cached);
    assert_ne!(a.analysis_id, b.analysis_id);
    assert_ne!(a.fingerprint, b.fingerprint);
}

#[tokio::test]
async fn callback_url_does_not_affect_dedup() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();

    let plain = AdviceSample::new("flask\n");
    let mut with_callback = AdviceSample::new("flask\n");
    with_callback.callback_url = Some("https://hooks.example.com/done".to_string());

    let first = dispatcher.dispatch(&plain, false).await.unwrap();
    let second = dispatcher.dispatch(&with_callback, false).await.unwrap();

    assert!(second.cached);
    assert_eq!(first.analysis_id, second.analysis_id);
}

#[tokio::test]
async fn publish_failure_writes_nothing() {
    let h = Harness::new();
    h.publisher.set_failing(true);
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let err = dispatcher.dispatch(&request, false).await.unwrap_err();

    assert!(matches!(err, stacklens_core::Error::Publish { .. }));
    assert!(!err.is_client_error());
    assert_eq!(
        h.cache.lookup(&request.fingerprint().unwrap()).await.unwrap(),
        CacheLookup::Miss
    );
    assert!(h.documents.ids(&WorkKind::Advice.requests_collection()).is_empty());

    // Once the bus is back, resubmission dispatches normally.
    h.publisher.set_failing(false);
    let outcome = dispatcher.dispatch(&request, false).await.unwrap();
    assert!(!outcome.cached);
}

#[tokio::test]
async fn image_resubmission_is_served_from_cache() {
    let h = Harness::new();
    let dispatcher = h.untimed_dispatcher::<ImageSample>();

    let first = dispatcher
        .dispatch(&ImageSample::new("quay.io/app:v1", "sha256:abc"), false)
        .await
        .unwrap();
    assert!(first.analysis_id.starts_with("package-extract-"));
    assert!(!first.cached);

    h.clock.advance(Duration::days(30));
    let second = dispatcher
        .dispatch(&ImageSample::new("quay.io/app:v1", "sha256:abc"), false)
        .await
        .unwrap();

    assert!(second.cached);
    assert_eq!(second.analysis_id, first.analysis_id);
    assert_eq!(h.published(), 1);
}

#[tokio::test]
async fn different_tags_of_same_content_dedup_together() {
    let h = Harness::new();
    let dispatcher = h.untimed_dispatcher::<ImageSample>();

    let tagged = dispatcher
        .dispatch(&ImageSample::new("quay.io/app:v1", "sha256:abc"), false)
        .await
        .unwrap();
    let latest = dispatcher
        .dispatch(&ImageSample::new("quay.io/app:latest", "sha256:abc"), false)
        .await
        .unwrap();
    let other = dispatcher
        .dispatch(&ImageSample::new("quay.io/app:v2", "sha256:def"), false)
        .await
        .unwrap();

    assert!(latest.cached);
    assert_eq!(tagged.analysis_id, latest.analysis_id);
    assert!(!other.cached);
    assert_eq!(h.published(), 2);
}

#[tokio::test]
async fn submit_never_deduplicates() {
    let h = Harness::new();
    let dispatcher = h.dispatcher::<AdviceSample>();
    let request = AdviceSample::new("flask\n");

    let a = dispatcher.submit(&request).await.unwrap();
    let b = dispatcher.submit(&request).await.unwrap();

    assert_ne!(a.analysis_id, b.analysis_id);
    assert_eq!(a.fingerprint, None);
    assert_eq!(h.published(), 2);
    assert!(h.cache.is_empty());
}
