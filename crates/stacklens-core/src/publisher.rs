// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bus publishers.
//!
//! Work is handed to workers by publishing a JSON trigger message to the
//! kind's topic. Publishing is fire-and-forget from the gateway's view: once
//! the bus accepts the message, the work item exists.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::{Error, Result};

/// Publishes trigger messages to topics.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// Publisher appending to Redis streams (`XADD <topic> * payload <json>`).
#[derive(Clone)]
pub struct RedisStreamPublisher {
    connection: ConnectionManager,
}

impl RedisStreamPublisher {
    /// Create a publisher on an existing connection.
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let mut conn = self.connection.clone();

        let entry_id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic = %topic, entry_id = %entry_id, "Message appended to stream");
        Ok(())
    }
}

/// A message captured by [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload.
    pub payload: Value,
}

/// In-memory publisher that records messages; optionally fails every publish.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    /// Create a publisher that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that rejects every message.
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    /// Toggle failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages published so far.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages published to `topic`.
    pub fn messages_on(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Publish {
                topic: topic.to_string(),
                reason: "publisher is in failure mode".to_string(),
            });
        }

        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        Ok(())
    }
}
