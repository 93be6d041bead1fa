//! API key authentication for the `/api/reglements` routes.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Request header carrying the key.
pub const API_KEY_HEADER: &str = "x-api-key";

const MISSING_KEY: &str = "API key required. Please provide X-API-Key header.";
const INVALID_KEY: &str = "Invalid API key";

/// The single key clients must present.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    /// Returns `Err` for a blank key; an empty key would accept nobody.
    pub fn new(key: impl AsRef<str>) -> Result<Self, String> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err("API key must not be empty".to_string());
        }
        Ok(Self(Arc::from(key)))
    }

    /// Constant-time comparison against a presented key.
    pub fn matches(&self, provided: &str) -> bool {
        constant_time_eq(provided.as_bytes(), self.0.as_bytes())
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&mask_token(&self.0)).finish()
    }
}

/// Authentication middleware for HTTP requests.
pub async fn require_api_key(
    State(api_key): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(header) = request.headers().get(API_KEY_HEADER) else {
        warn!(path = %request.uri().path(), "Authentication failed: missing X-API-Key header");
        return unauthorized(MISSING_KEY);
    };

    // A header that is not visible ASCII cannot equal the configured key.
    let provided = header.to_str().unwrap_or_default();
    if provided.is_empty() {
        warn!(path = %request.uri().path(), "Authentication failed: empty X-API-Key header");
        return unauthorized(MISSING_KEY);
    }

    if api_key.matches(provided) {
        next.run(request).await
    } else {
        warn!(
            path = %request.uri().path(),
            key_prefix = %mask_token(provided),
            "Authentication failed: invalid API key"
        );
        unauthorized(INVALID_KEY)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_token(token: &str) -> String {
    match token.char_indices().nth(3) {
        Some((end, _)) => format!("{}***", &token[..end]),
        None => "***".to_string(),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}
