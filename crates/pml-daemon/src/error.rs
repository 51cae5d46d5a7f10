// SPDX-License-Identifier: MIT OR Apache-2.0
//! Uniform HTTP error response, translating a [`PmlError`] or store
//! failure into a status code plus a small JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pml_capability_store::StoreError;
use pml_error::{ErrorCategory, PmlError};
use serde_json::json;

/// A uniform API failure: a status code plus a short, actionable message.
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    /// Build a `404 Not Found` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: "NOT_FOUND".into(), message: message.into() }
    }

    /// Build a `400 Bad Request` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "BAD_REQUEST".into(), message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": { "code": self.code, "message": self.message } }))).into_response()
    }
}

impl From<PmlError> for ApiError {
    fn from(err: PmlError) -> Self {
        let status = match err.code.category() {
            ErrorCategory::Static | ErrorCategory::Argument => StatusCode::BAD_REQUEST,
            ErrorCategory::Approval => StatusCode::CONFLICT,
            ErrorCategory::Store => StatusCode::CONFLICT,
            ErrorCategory::Tool | ErrorCategory::Worker | ErrorCategory::Replan | ErrorCategory::Cache => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code: format!("{:?}", err.code), message: err.message }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::NameCollision(_) | StoreError::VersionConflict { .. } | StoreError::Alias(_) => StatusCode::CONFLICT,
            StoreError::Io(_) | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code: "STORE_ERROR".into(), message: err.to_string() }
    }
}
