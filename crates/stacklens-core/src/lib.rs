// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stacklens Core - Request Deduplication and Work Dispatch
//!
//! This crate implements the protocol that sits between the user-facing gateway
//! and the asynchronous workers: fingerprinting requests, deduplicating them
//! against a cache, publishing work to the message bus, and reconciling the
//! state of dispatched work from several independent sources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        stacklens-gateway (HTTP)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                    │ dispatch                     │ status / log
//!                    ▼                              ▼
//! ┌──────────────────────────────────┐  ┌──────────────────────────────────┐
//! │         Dispatcher<R>            │  │           Reconciler             │
//! │  digest → cache → publish →      │  │  results → orchestrator →        │
//! │  cache upsert + audit record     │  │  audit records                   │
//! └──────────────────────────────────┘  └──────────────────────────────────┘
//!      │            │            │              │              │
//!      ▼            ▼            ▼              ▼              ▼
//! ┌─────────┐ ┌───────────┐ ┌──────────┐ ┌──────────────┐ ┌──────────────┐
//! │  Cache  │ │ Publisher │ │ Document │ │ Orchestrator │ │   Document   │
//! │ (Redis) │ │ (streams) │ │  store   │ │   status     │ │    store     │
//! └─────────┘ └───────────┘ └──────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! # Work State Machine
//!
//! ```text
//!   dispatch ──► QUEUED ──► SCHEDULED ──► RUNNING ──┬──► SUCCEEDED
//!                 (audit     (phase        (phase   │     (result
//!                  record)    pending)      running)│      document)
//!                                                   └──► FAILED
//!
//!   unknown id / no audit record ──► NOT_FOUND
//! ```
//!
//! # Modules
//!
//! - [`auth`]: Shared-secret gate for protected request fields
//! - [`cache`]: Dedup cache records and cache store backends
//! - [`clock`]: Time source used for cache freshness
//! - [`digest`]: Request fingerprints
//! - [`dispatch`]: Generic work dispatcher
//! - [`error`]: Error types
//! - [`kind`]: Work kinds and work-item identifiers
//! - [`orchestrator`]: Orchestrator status API clients
//! - [`publisher`]: Message bus publishers
//! - [`reconcile`]: Status reconciliation
//! - [`store`]: Durable document stores

#![deny(missing_docs)]

/// Shared-secret authentication for protected request fields.
pub mod auth;

/// Dedup cache records and stores.
pub mod cache;

/// Time source for freshness checks.
pub mod clock;

/// Request fingerprinting.
pub mod digest;

/// Generic work dispatcher.
pub mod dispatch;

/// Error types for core operations.
pub mod error;

/// Work kinds and identifiers.
pub mod kind;

/// Orchestrator status API.
pub mod orchestrator;

/// Message bus publishers.
pub mod publisher;

/// Status reconciliation across result store, orchestrator and audit records.
pub mod reconcile;

/// Durable document stores.
pub mod store;

pub use cache::{CacheLookup, CacheRecord, CacheStore};
pub use digest::Fingerprint;
pub use dispatch::{DispatchContext, DispatchOutcome, DispatchRequest, Dispatcher, ServiceInfo};
pub use error::{Error, Result};
pub use kind::{Namespaces, WorkItemId, WorkKind};
pub use reconcile::{Reconciler, Reconciliation, WorkState};
