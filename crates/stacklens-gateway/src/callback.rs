// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advice callbacks.
//!
//! A client may ask to be called back when its advice is ready. Callbacks of
//! work still in flight are registered in the document store under the
//! work-item id, where the delivering component picks them up. When a request
//! is answered from the cache and the cached work is already finished, the
//! gateway delivers the callback itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use stacklens_core::Result;
use stacklens_core::store::DocumentStore;

/// Collection holding callback registrations.
pub const CALLBACKS_COLLECTION: &str = "callbacks";

/// Where and how to deliver a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackInfo {
    /// Target URL.
    pub url: String,
    /// Value of the `Authorization` header sent with the callback.
    #[serde(default)]
    pub authorization: Option<String>,
    /// Opaque client data echoed back in the callback.
    #[serde(default)]
    pub client_data: Option<Value>,
}

impl CallbackInfo {
    /// Copy suitable for echoing and auditing: the authorization is masked.
    pub fn redacted(&self) -> Value {
        json!({
            "url": self.url,
            "authorization": self.authorization.as_ref().map(|_| "***"),
            "client_data": self.client_data,
        })
    }
}

/// Callback delivery failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallbackError {
    /// The request could not be sent.
    #[error("callback request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The target answered with an error status.
    #[error("callback target answered HTTP {0}")]
    Status(u16),
}

/// Delivers callbacks.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    /// POST `body` to `callback.url`.
    async fn notify(&self, callback: &CallbackInfo, body: &Value) -> std::result::Result<(), CallbackError>;
}

/// Notifier POSTing JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCallbackNotifier {
    client: reqwest::Client,
}

impl HttpCallbackNotifier {
    /// Create a notifier with a 10 second timeout.
    pub fn new() -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, callback: &CallbackInfo, body: &Value) -> std::result::Result<(), CallbackError> {
        let mut request = self.client.post(&callback.url).json(body);
        if let Some(authorization) = &callback.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status(status.as_u16()));
        }

        debug!(url = %callback.url, status = status.as_u16(), "Callback delivered");
        Ok(())
    }
}

/// Notifier recording deliveries in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<(CallbackInfo, Value)>>,
}

impl RecordingNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks delivered so far.
    pub fn deliveries(&self) -> Vec<(CallbackInfo, Value)> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, callback: &CallbackInfo, body: &Value) -> std::result::Result<(), CallbackError> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((callback.clone(), body.clone()));
        Ok(())
    }
}

/// Callback registrations, one document per work item.
#[derive(Clone)]
pub struct CallbackRegistry {
    documents: Arc<dyn DocumentStore>,
}

impl CallbackRegistry {
    /// Create a registry on `documents`.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Append `callback` to the registrations of `analysis_id`.
    pub async fn register(&self, analysis_id: &str, callback: &CallbackInfo) -> Result<()> {
        let registrations = self
            .documents
            .append_to_list(
                CALLBACKS_COLLECTION,
                analysis_id,
                "callbacks",
                &serde_json::to_value(callback)?,
            )
            .await?;

        info!(
            analysis_id = %analysis_id,
            registrations,
            "Callback registered"
        );
        Ok(())
    }

    /// Callbacks registered for `analysis_id`.
    pub async fn registered(&self, analysis_id: &str) -> Result<Vec<CallbackInfo>> {
        let document = self
            .documents
            .retrieve_document(CALLBACKS_COLLECTION, analysis_id)
            .await?;

        Ok(match document {
            Some(mut document) => match document.get_mut("callbacks").map(Value::take) {
                Some(callbacks) => serde_json::from_value(callbacks)?,
                None => Vec::new(),
            },
            None => Vec::new(),
        })
    }
}
