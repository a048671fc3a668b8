// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.
//!
//! Client errors carry `{"error", "parameters"}` so the caller can see what
//! the gateway understood. Server errors never leak internals; they carry the
//! error type and a timestamp for correlating with the logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::error;

use crate::image::ImageError;
use stacklens_core::auth::AuthError;

const INTERNAL_ERROR_MESSAGE: &str =
    "Internal server error occurred, please contact administrator with provided details.";

/// An error rendered as a JSON response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Human readable message.
    pub message: String,
    /// Request parameters echoed back.
    pub parameters: Option<Value>,
    /// Error type, reported for server errors.
    pub error_type: Option<String>,
}

impl ApiError {
    /// Client error with `status`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            parameters: None,
            error_type: None,
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 500 Internal Server Error of the given type.
    pub fn internal(error_type: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            parameters: None,
            error_type: Some(error_type.into()),
        }
    }

    /// Attach the echoed request parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// JSON body of the response.
    pub fn body(&self) -> Value {
        if self.status.is_server_error() {
            return json!({
                "error": self.message,
                "details": {
                    "type": self.error_type.as_deref().unwrap_or("Error"),
                    "datetime": chrono::Utc::now().to_rfc3339(),
                },
            });
        }

        match &self.parameters {
            Some(parameters) => json!({ "error": self.message, "parameters": parameters }),
            None => json!({ "error": self.message }),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<stacklens_core::Error> for ApiError {
    fn from(err: stacklens_core::Error) -> Self {
        match &err {
            stacklens_core::Error::InvalidWorkItemId { id, .. } => {
                ApiError::bad_request("Wrong analysis id provided")
                    .with_parameters(json!({ "analysis_id": id }))
            }
            _ => {
                error!(error = %err, error_type = err.kind_name(), "Request failed");
                ApiError::internal(err.kind_name())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

impl From<ImageError> for ApiError {
    fn from(err: ImageError) -> Self {
        ApiError::new(err.status(), err.to_string())
    }
}
