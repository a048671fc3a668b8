// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stacklens Gateway - User-facing HTTP API
//!
//! Accepts requests to analyze container images, check the provenance of
//! Python application stacks and compute dependency advice. Requests are
//! validated and normalized here, deduplicated and dispatched through
//! [`stacklens_core`], and polled through status, log and result endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              HTTP clients                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   stacklens-gateway (This Crate, axum)                   │
//! │  ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌─────────┐  ┌─────────┐  │
//! │  │ Analysis  │  │ Provenance │  │  Advice  │  │  Build  │  │  Repo   │  │
//! │  └───────────┘  └────────────┘  └──────────┘  └─────────┘  └─────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │ inspect             │ dispatch / reconcile           │ notify
//!        ▼                     ▼                                ▼
//! ┌──────────────┐  ┌────────────────────────────────┐  ┌──────────────────┐
//! │   Registry   │  │        stacklens-core           │  │ Callback targets │
//! │   (skopeo)   │  │ cache, bus, orchestrator, store │  │  (client hooks)  │
//! └──────────────┘  └────────────────────────────────┘  └──────────────────┘
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/analyze` | Analyze a container image |
//! | `GET` | `/api/v1/analyze` | List image analyses |
//! | `GET` | `/api/v1/analyze/{id}` | Image analysis result |
//! | `GET` | `/api/v1/analyze/{id}/status` | Image analysis status |
//! | `GET` | `/api/v1/analyze/{id}/log` | Image analysis log |
//! | `GET` | `/api/v1/analyze/by-hash/{digest}` | Analysis of an image content digest |
//! | `POST` | `/api/v1/image/metadata` | Inspect an image in its registry |
//! | `POST` | `/api/v1/provenance/python` | Check provenance of an application stack |
//! | `POST` | `/api/v1/advise/python` | Compute dependency advice |
//! | `POST` | `/api/v1/build` | Analyze a container build |
//! | `GET` | `/api/v1/buildlog/{document_id}` | Stored build log |
//! | `POST` | `/api/v1/repo/init` | Initialize a repository |
//!
//! Provenance, advice and build analyses expose the same list/result/status/log
//! endpoints under `/api/v1/provenance/python`, `/api/v1/advise/python` and
//! `/api/v1/build`.

#![deny(missing_docs)]

/// Registration and delivery of advice callbacks.
pub mod callback;

/// Configuration from environment variables.
pub mod config;

/// HTTP error responses.
pub mod error;

/// Request handlers.
pub mod handlers;

/// Container image registry inspection.
pub mod image;

/// Page arithmetic for list endpoints.
pub mod pagination;

/// Request parameter validation and normalization.
pub mod params;

/// Embeddable gateway runtime.
pub mod runtime;

/// HTTP router.
pub mod server;

pub use config::{Config, Settings};
pub use error::ApiError;
pub use handlers::{ApiResponse, GatewayState};
