//! HTTP API: router, shared state and request extraction.
//!
//! Everything under `/api/reglements`, unknown paths included, sits behind
//! the API key middleware; the liveness route and the top-level 404 do not.

pub mod bulk;
pub mod error;
pub mod reglements;
pub mod validation;

pub use error::ApiError;

use crate::auth::{ApiKey, require_api_key};
use crate::config::{Environment, MAX_BODY_BYTES};
use crate::db::Database;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use chrono::{SecondsFormat, Utc};
use serde_json::{Value as JsonValue, json};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Base path of the record routes.
pub const REGLEMENTS_PATH: &str = "/api/reglements";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub environment: Environment,
}

impl AppState {
    pub fn new(db: Database, environment: Environment) -> Self {
        Self { db, environment }
    }

    /// Map a database failure on a write route.
    pub fn db_error(&self, error: &'static str) -> impl FnOnce(crate::error::DbError) -> ApiError {
        let environment = self.environment;
        move |source| ApiError::database(error, source, environment)
    }
}

/// Build the application router.
pub fn router(state: AppState, api_key: ApiKey) -> Router {
    let reglements = Router::new()
        .route("/", get(reglements::list).post(reglements::create))
        .route("/bulk", post(bulk::create_many))
        .route("/bulk/update", patch(bulk::update_many))
        .route("/bulk/delete", delete(bulk::delete_many))
        .route(
            "/{id}",
            get(reglements::fetch)
                .patch(reglements::patch)
                .put(reglements::replace)
                .delete(reglements::remove),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(api_key, require_api_key));

    Router::new()
        .route("/", get(root))
        .nest(REGLEMENTS_PATH, reglements)
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
}

async fn root() -> Json<JsonValue> {
    Json(json!({
        "message": "API Reglements is running!",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "endpoints": { "reglements": REGLEMENTS_PATH }
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found" })),
    )
}

/// JSON request body.
///
/// An empty body reads as `{}`; malformed JSON is a 400 in the API's error
/// shape rather than axum's plain-text rejection.
#[derive(Debug)]
pub struct JsonBody(pub JsonValue);

impl<S: Send + Sync> FromRequest<S> for JsonBody {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Message {
                status: rejection.status(),
                error: rejection.body_text(),
            })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(JsonValue::Object(Default::default())));
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
    }
}
