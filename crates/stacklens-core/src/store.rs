// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable document stores.
//!
//! Result documents (written by workers), request audit records, stored build
//! logs, workflow logs and callback registrations all live in one store keyed
//! by `(collection, document_id)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// A stored document with its listing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEntry {
    /// Document id within its collection.
    pub document_id: String,
    /// Document body.
    pub body: Value,
    /// When the document was first stored.
    pub created_at: DateTime<Utc>,
}

/// Document store operations needed by the gateway.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `body` under `(collection, document_id)`, replacing any previous body.
    async fn store_document(&self, collection: &str, document_id: &str, body: &Value)
    -> Result<()>;

    /// Retrieve a document body.
    async fn retrieve_document(&self, collection: &str, document_id: &str)
    -> Result<Option<Value>>;

    /// Whether a document exists.
    async fn document_exists(&self, collection: &str, document_id: &str) -> Result<bool> {
        Ok(self.retrieve_document(collection, document_id).await?.is_some())
    }

    /// Append `item` to the array under `field` of a document, creating the
    /// document or the array when missing. Concurrent appends are not lost.
    /// Returns the new length of the array.
    async fn append_to_list(
        &self,
        collection: &str,
        document_id: &str,
        field: &str,
        item: &Value,
    ) -> Result<usize>;

    /// Number of documents in a collection.
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Page of documents in a collection, newest first.
    async fn list(&self, collection: &str, offset: u64, limit: u64) -> Result<Vec<DocumentEntry>>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// Document store backed by a single PostgreSQL `documents` table.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `documents` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn store_document(
        &self,
        collection: &str,
        document_id: &str,
        body: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, document_id, body, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (collection, document_id)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(document_id)
        .bind(sqlx::types::Json(body))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retrieve_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>> {
        let row: Option<(sqlx::types::Json<Value>,)> = sqlx::query_as(
            r#"
            SELECT body FROM documents
            WHERE collection = $1 AND document_id = $2
            "#,
        )
        .bind(collection)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(body,)| body.0))
    }

    async fn document_exists(&self, collection: &str, document_id: &str) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM documents WHERE collection = $1 AND document_id = $2
            )
            "#,
        )
        .bind(collection)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn append_to_list(
        &self,
        collection: &str,
        document_id: &str,
        field: &str,
        item: &Value,
    ) -> Result<usize> {
        let length: (i32,) = sqlx::query_as(
            r#"
            INSERT INTO documents (collection, document_id, body, created_at, updated_at)
            VALUES ($1, $2, jsonb_build_object($3::text, jsonb_build_array($4::jsonb)), NOW(), NOW())
            ON CONFLICT (collection, document_id)
            DO UPDATE SET
                body = jsonb_set(
                    documents.body,
                    ARRAY[$3::text],
                    COALESCE(documents.body -> $3::text, '[]'::jsonb) || jsonb_build_array($4::jsonb)
                ),
                updated_at = NOW()
            RETURNING jsonb_array_length(body -> $3::text)
            "#,
        )
        .bind(collection)
        .bind(document_id)
        .bind(field)
        .bind(sqlx::types::Json(item))
        .fetch_one(&self.pool)
        .await?;

        Ok(length.0.max(0) as usize)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0.max(0) as u64)
    }

    async fn list(&self, collection: &str, offset: u64, limit: u64) -> Result<Vec<DocumentEntry>> {
        let rows: Vec<(String, sqlx::types::Json<Value>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT document_id, body, created_at FROM documents
            WHERE collection = $1
            ORDER BY created_at DESC, document_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(collection)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(document_id, body, created_at)| DocumentEntry {
                document_id,
                body: body.0,
                created_at,
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone)]
struct StoredDocument {
    seq: u64,
    body: Value,
    created_at: DateTime<Utc>,
}

/// Process-local document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<(String, String), StoredDocument>,
    seq: AtomicU64,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of all documents in a collection, in insertion order.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        let mut entries: Vec<(u64, String)> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == collection)
            .map(|e| (e.value().seq, e.key().1.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn store_document(
        &self,
        collection: &str,
        document_id: &str,
        body: &Value,
    ) -> Result<()> {
        let key = (collection.to_string(), document_id.to_string());
        match self.documents.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().body = body.clone(),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredDocument {
                    seq: self.seq.fetch_add(1, Ordering::SeqCst),
                    body: body.clone(),
                    created_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn retrieve_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>> {
        let key = (collection.to_string(), document_id.to_string());
        Ok(self.documents.get(&key).map(|d| d.body.clone()))
    }

    async fn append_to_list(
        &self,
        collection: &str,
        document_id: &str,
        field: &str,
        item: &Value,
    ) -> Result<usize> {
        let key = (collection.to_string(), document_id.to_string());
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut document = self.documents.entry(key).or_insert_with(|| StoredDocument {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            body: Value::Object(Default::default()),
            created_at: Utc::now(),
        });

        if !document.body.is_object() {
            document.body = Value::Object(Default::default());
        }
        let list = document
            .body
            .as_object_mut()
            .map(|fields| {
                fields
                    .entry(field.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()))
            });
        match list {
            Some(Value::Array(items)) => {
                items.push(item.clone());
                Ok(items.len())
            }
            Some(other) => {
                *other = Value::Array(vec![item.clone()]);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .documents
            .iter()
            .filter(|e| e.key().0 == collection)
            .count() as u64)
    }

    async fn list(&self, collection: &str, offset: u64, limit: u64) -> Result<Vec<DocumentEntry>> {
        let mut entries: Vec<(u64, DocumentEntry)> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == collection)
            .map(|e| {
                (
                    e.value().seq,
                    DocumentEntry {
                        document_id: e.key().1.clone(),
                        body: e.value().body.clone(),
                        created_at: e.value().created_at,
                    },
                )
            })
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(entries
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, entry)| entry)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_and_overwrites() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.retrieve_document("c", "a").await.unwrap(), None);
        assert!(!store.document_exists("c", "a").await.unwrap());

        store.store_document("c", "a", &json!({"v": 1})).await.unwrap();
        store.store_document("c", "a", &json!({"v": 2})).await.unwrap();

        assert_eq!(
            store.retrieve_document("c", "a").await.unwrap(),
            Some(json!({"v": 2}))
        );
        assert_eq!(store.count("c").await.unwrap(), 1);
        assert_eq!(store.count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_lists_newest_first() {
        let store = MemoryDocumentStore::new();
        for id in ["a", "b", "c", "d"] {
            store.store_document("c", id, &json!({"id": id})).await.unwrap();
        }
        store.store_document("x", "z", &json!({})).await.unwrap();

        let page: Vec<String> = store
            .list("c", 1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.document_id)
            .collect();
        assert_eq!(page, vec!["c", "b"]);
        assert_eq!(store.ids("c"), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn memory_store_appends_to_lists() {
        let store = MemoryDocumentStore::new();

        assert_eq!(store.append_to_list("c", "a", "items", &json!(1)).await.unwrap(), 1);
        assert_eq!(store.append_to_list("c", "a", "items", &json!(2)).await.unwrap(), 2);
        assert_eq!(
            store.retrieve_document("c", "a").await.unwrap(),
            Some(json!({"items": [1, 2]}))
        );

        store.store_document("c", "b", &json!({"other": true})).await.unwrap();
        store.append_to_list("c", "b", "items", &json!("x")).await.unwrap();
        assert_eq!(
            store.retrieve_document("c", "b").await.unwrap(),
            Some(json!({"other": true, "items": ["x"]}))
        );
    }

    #[tokio::test]
    async fn memory_store_list_past_the_end_is_empty() {
        let store = MemoryDocumentStore::new();
        store.store_document("c", "a", &json!({})).await.unwrap();

        assert!(store.list("c", u64::MAX, 10).await.unwrap().is_empty());
    }
}
