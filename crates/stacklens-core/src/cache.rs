// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dedup cache.
//!
//! Maps a request fingerprint to the id of the work item that was dispatched
//! for it. Records are upserted on every dispatch (last write wins) and never
//! deleted; the caller decides freshness with its own TTL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::digest::Fingerprint;
use crate::error::Result;

/// Value stored under a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Work item dispatched for the fingerprint.
    pub analysis_id: String,
    /// Unix timestamp (seconds) of the dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl CacheRecord {
    /// Record a dispatch happening at `at`.
    pub fn new(analysis_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            timestamp: Some(at.timestamp()),
        }
    }

    /// Record without a timestamp. Only fresh under a cache without TTL.
    pub fn untimed(analysis_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            timestamp: None,
        }
    }

    /// Whether the record may be reused at `now`.
    ///
    /// Without a TTL every record is fresh. With a TTL a record is fresh while
    /// `timestamp + ttl > now`; records without a timestamp are stale.
    pub fn is_fresh(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return true;
        };
        match self.timestamp {
            Some(ts) => ts.saturating_add(ttl.num_seconds()) > now.timestamp(),
            None => false,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// A record exists for the fingerprint.
    Found(CacheRecord),
    /// Nothing is recorded for the fingerprint.
    Miss,
}

impl CacheLookup {
    /// Record if found.
    pub fn record(self) -> Option<CacheRecord> {
        match self {
            CacheLookup::Found(record) => Some(record),
            CacheLookup::Miss => None,
        }
    }
}

/// Key-value store of dedup records, one instance per cache namespace.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the record stored under `fingerprint`.
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<CacheLookup>;

    /// Store `record` under `fingerprint`, replacing any previous record.
    async fn store(&self, fingerprint: &Fingerprint, record: &CacheRecord) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    records: DashMap<String, CacheRecord>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<CacheLookup> {
        Ok(match self.records.get(fingerprint.as_str()) {
            Some(record) => CacheLookup::Found(record.clone()),
            None => CacheLookup::Miss,
        })
    }

    async fn store(&self, fingerprint: &Fingerprint, record: &CacheRecord) -> Result<()> {
        self.records
            .insert(fingerprint.as_str().to_string(), record.clone());
        Ok(())
    }
}

// ============================================================================
// Redis store
// ============================================================================

/// Cache store backed by Redis string keys `<prefix>:<namespace>:<fingerprint>`.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCacheStore {
    /// Create a store for one cache namespace (e.g. `analyses`).
    pub fn new(connection: ConnectionManager, prefix: &str, namespace: &str) -> Self {
        Self {
            connection,
            key_prefix: format!("{}:{}", prefix, namespace),
        }
    }

    fn key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<CacheLookup> {
        let key = self.key(fingerprint);
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(&key).await?;

        match raw {
            Some(raw) => {
                debug!(key = %key, "Cache record found");
                Ok(CacheLookup::Found(serde_json::from_str(&raw)?))
            }
            None => Ok(CacheLookup::Miss),
        }
    }

    async fn store(&self, fingerprint: &Fingerprint, record: &CacheRecord) -> Result<()> {
        let key = self.key(fingerprint);
        let value = serde_json::to_string(record)?;
        let mut conn = self.connection.clone();
        let _: () = conn.set(&key, value).await?;
        Ok(())
    }
}
