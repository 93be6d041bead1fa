//! HTTP error responses.

use crate::config::Environment;
use crate::error::DbError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value as JsonValue, json};
use tracing::error;

/// Everything a handler can fail with, already mapped to a response shape.
#[derive(Debug)]
pub enum ApiError {
    /// 400 `{success, errors}`.
    Validation(Vec<String>),
    /// `{success, error}` with the given status.
    Message { status: StatusCode, error: String },
    /// 400 `{success, error, invalidIds}`.
    InvalidIds {
        error: String,
        invalid_ids: Vec<JsonValue>,
    },
    /// 500 `{success, error, details?}`.
    Internal {
        error: &'static str,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::Message {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::Message {
            status: StatusCode::NOT_FOUND,
            error: error.into(),
        }
    }

    pub fn reglement_not_found() -> Self {
        Self::not_found("Reglement not found")
    }

    /// Database failure. The underlying message is only exposed when the
    /// environment allows it.
    pub fn database(error: &'static str, source: DbError, environment: Environment) -> Self {
        log_source(error, &source);
        Self::Internal {
            error,
            details: environment
                .exposes_error_details()
                .then(|| source.to_string()),
        }
    }

    /// Database failure on a read route; never carries details.
    pub fn fetch(error: &'static str, source: DbError) -> Self {
        log_source(error, &source);
        Self::Internal {
            error,
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidIds { .. } => StatusCode::BAD_REQUEST,
            Self::Message { status, .. } => *status,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn log_source(error: &str, source: &DbError) {
    error!(
        error = %source,
        sql_state = ?source.sql_state(),
        suggestion = ?source.suggestion(),
        "{}",
        error
    );
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Validation(errors) => json!({ "success": false, "errors": errors }),
            Self::Message { error, .. } => json!({ "success": false, "error": error }),
            Self::InvalidIds { error, invalid_ids } => {
                json!({ "success": false, "error": error, "invalidIds": invalid_ids })
            }
            Self::Internal { error, details } => match details {
                Some(details) => json!({ "success": false, "error": error, "details": details }),
                None => json!({ "success": false, "error": error }),
            },
        };
        (status, Json(body)).into_response()
    }
}
