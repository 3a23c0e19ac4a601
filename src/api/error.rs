//! JSON error responses: `{reason, details, context}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::storage::{ErrorClass, StorageError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub reason: String,
    pub details: String,
    pub context: Map<String, Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    reason: &'a str,
    details: &'a str,
    #[serde(skip_serializing_if = "Map::is_empty")]
    context: &'a Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            details: details.into(),
            context: Map::new(),
        }
    }

    pub fn bad_request(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason, details)
    }

    pub fn internal(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, reason, details)
    }

    /// Map a storage failure to its status code.
    pub fn storage(reason: impl Into<String>, err: &StorageError) -> Self {
        let status = match err.class() {
            ErrorClass::Client if err.is_not_found() => StatusCode::NOT_FOUND,
            ErrorClass::Client if err.is_conflict() => StatusCode::CONFLICT,
            ErrorClass::Client => StatusCode::BAD_REQUEST,
            ErrorClass::Server | ErrorClass::Corrupt => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match err.class() {
            ErrorClass::Client => tracing::debug!(error = %err, "request rejected"),
            ErrorClass::Server => tracing::warn!(error = %err, "storage operation failed"),
            ErrorClass::Corrupt => tracing::error!(error = %err, "storage is in a corrupt state"),
        }
        Self::new(status, reason, err.to_string())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            reason: &self.reason,
            details: &self.details,
            context: &self.context,
        };
        (self.status, Json(body)).into_response()
    }
}
