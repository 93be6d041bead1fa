//! Single-record routes under `/api/reglements`.
//!
//! Record-level steps (existence check, venue lookup, partial update
//! resolution) are generic over [`QueryRunner`] and shared with the bulk
//! routes, which run them inside a transaction.

use super::validation::{PatchStep, PatchValue, UpdatePlan, parse_id, plan_patch, validate_full};
use super::{ApiError, AppState, JsonBody};
use crate::db::QueryRunner;
use crate::error::DbResult;
use crate::models::{
    ExecutionResult, QueryParam, QuerySpec, REGLEMENT_KEY, REGLEMENT_TABLE, Row, SALLE_TABLE,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::info;

const DEFAULT_LIST_LIMIT: i64 = 100;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<String>,
}

/// `GET /api/reglements`
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JsonValue>> {
    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_LIST_LIMIT,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or_else(|| ApiError::bad_request("limit must be a non-negative integer"))?,
    };

    let spec = QuerySpec::new(format!(
        "SELECT r.*, s.name AS salle_name FROM \"{}\" r LEFT JOIN \"{}\" s ON r.id_salle_id = s.id_salle ORDER BY r.\"{}\" DESC LIMIT $1",
        REGLEMENT_TABLE, SALLE_TABLE, REGLEMENT_KEY
    ))
    .bind(limit);
    let result = state
        .db
        .query(&spec)
        .await
        .map_err(|e| ApiError::fetch("Failed to fetch reglements", e))?;

    Ok(Json(json!({
        "success": true,
        "count": result.row_count,
        "data": result.rows,
    })))
}

/// `GET /api/reglements/{id}`
pub async fn fetch(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let id = path_id(&raw_id)?;
    let spec = QuerySpec::new(format!(
        "SELECT r.*, s.name AS salle_name FROM \"{}\" r LEFT JOIN \"{}\" s ON r.id_salle_id = s.id_salle WHERE r.\"{}\" = $1",
        REGLEMENT_TABLE, SALLE_TABLE, REGLEMENT_KEY
    ))
    .bind(id);
    let row = state
        .db
        .query(&spec)
        .await
        .map_err(|e| ApiError::fetch("Failed to fetch reglement", e))?
        .into_first()
        .ok_or_else(ApiError::reglement_not_found)?;

    Ok(Json(json!({ "success": true, "data": row })))
}

/// `POST /api/reglements`
pub async fn create(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    let record = validate_full(&body).map_err(ApiError::Validation)?;

    let mut db = state.db.clone();
    if !salle_exists(&mut db, record.salle_id)
        .await
        .map_err(state.db_error("Failed to create reglement"))?
    {
        return Err(ApiError::bad_request(salle_not_found(record.salle_id)));
    }

    let created = db
        .run(&record.insert_query())
        .await
        .map_err(state.db_error("Failed to create reglement"))?
        .into_first();
    info!(salle_id = record.salle_id, "Reglement created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Reglement created successfully",
            "data": created,
        })),
    ))
}

/// `PATCH /api/reglements/{id}`
pub async fn patch(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<JsonValue>> {
    let id = path_id(&raw_id)?;
    let mut db = state.db.clone();

    let previous = find_reglement(&mut db, id)
        .await
        .map_err(state.db_error("Failed to update reglement"))?
        .ok_or_else(ApiError::reglement_not_found)?;

    let fields = match body.as_object() {
        Some(fields) if !fields.is_empty() => fields,
        _ => {
            return Err(ApiError::bad_request(
                "At least one field must be provided for update",
            ));
        }
    };

    let plan = match resolve_patch(&mut db, fields)
        .await
        .map_err(state.db_error("Failed to update reglement"))?
    {
        PatchResolution::Ready(plan) => plan,
        PatchResolution::Invalid(errors) => return Err(ApiError::Validation(errors)),
        PatchResolution::Empty => {
            return Err(ApiError::bad_request("No valid fields provided for update"));
        }
    };

    let updated = db
        .run(&plan.update_query(id))
        .await
        .map_err(state.db_error("Failed to update reglement"))?
        .into_first();
    info!(id, fields = ?plan.field_names(), "Reglement patched");

    Ok(Json(json!({
        "success": true,
        "message": "Reglement updated successfully",
        "data": updated,
        "previous": previous,
        "updatedFields": plan.field_names(),
    })))
}

/// `PUT /api/reglements/{id}`
pub async fn replace(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<JsonValue>> {
    let id = path_id(&raw_id)?;
    let mut db = state.db.clone();

    let previous = find_reglement(&mut db, id)
        .await
        .map_err(state.db_error("Failed to update reglement"))?
        .ok_or_else(ApiError::reglement_not_found)?;

    let record = validate_full(&body).map_err(ApiError::Validation)?;
    if !salle_exists(&mut db, record.salle_id)
        .await
        .map_err(state.db_error("Failed to update reglement"))?
    {
        return Err(ApiError::bad_request(salle_not_found(record.salle_id)));
    }

    let updated = db
        .run(&record.replace_query(id))
        .await
        .map_err(state.db_error("Failed to update reglement"))?
        .into_first();
    info!(id, "Reglement replaced");

    Ok(Json(json!({
        "success": true,
        "message": "Reglement updated successfully",
        "data": updated,
        "previous": previous,
    })))
}

/// `DELETE /api/reglements/{id}`
pub async fn remove(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let id = path_id(&raw_id)?;
    let mut db = state.db.clone();

    let existing = find_reglement(&mut db, id)
        .await
        .map_err(state.db_error("Failed to delete reglement"))?
        .ok_or_else(ApiError::reglement_not_found)?;

    let deleted = delete_reglement(&mut db, id, existing)
        .await
        .map_err(state.db_error("Failed to delete reglement"))?;
    info!(id, "Reglement deleted");

    Ok(Json(json!({
        "success": true,
        "message": "Reglement deleted successfully",
        "deleted": deleted,
    })))
}

fn path_id(raw: &str) -> ApiResult<i64> {
    parse_id(raw).ok_or_else(|| ApiError::bad_request("Invalid reglement id"))
}

pub(crate) fn salle_not_found(id: i64) -> String {
    format!("Salle with id {} not found", id)
}

pub(crate) async fn find_reglement<R: QueryRunner>(runner: &mut R, id: i64) -> DbResult<Option<Row>> {
    let spec = QuerySpec::new(format!(
        "SELECT * FROM \"{}\" WHERE \"{}\" = $1",
        REGLEMENT_TABLE, REGLEMENT_KEY
    ))
    .bind(id);
    Ok(runner.run(&spec).await?.into_first())
}

pub(crate) async fn salle_exists<R: QueryRunner>(runner: &mut R, id: i64) -> DbResult<bool> {
    let spec = QuerySpec::new(format!(
        "SELECT id_salle FROM \"{}\" WHERE id_salle = $1",
        SALLE_TABLE
    ))
    .bind(id);
    Ok(!runner.run(&spec).await?.is_empty())
}

/// Delete `id` and report the removed row.
///
/// MySQL cannot return deleted rows, so there the row read beforehand is
/// reported.
pub(crate) async fn delete_reglement<R: QueryRunner>(
    runner: &mut R,
    id: i64,
    existing: Row,
) -> DbResult<Row> {
    let spec = QuerySpec::new(format!(
        "DELETE FROM \"{}\" WHERE \"{}\" = $1 RETURNING *",
        REGLEMENT_TABLE, REGLEMENT_KEY
    ))
    .bind(id);
    let result = runner.run(&spec).await?;
    Ok(reported_deletion(result, existing, runner.db_type().needs_adapter()))
}

fn reported_deletion(result: ExecutionResult, existing: Row, adapted: bool) -> Row {
    if adapted {
        return existing;
    }
    result.into_first().unwrap_or(existing)
}

pub(crate) enum PatchResolution {
    Ready(UpdatePlan),
    Invalid(Vec<String>),
    Empty,
}

/// Validate a partial update body, looking up venue references on `runner`.
pub(crate) async fn resolve_patch<R: QueryRunner>(
    runner: &mut R,
    body: &Row,
) -> DbResult<PatchResolution> {
    let mut plan = UpdatePlan::default();
    let mut errors = Vec::new();
    for step in plan_patch(body) {
        match step {
            PatchStep::Reject(message) => errors.push(message),
            PatchStep::Set(field, value) => plan.push(field, value),
            PatchStep::CheckSalle(field, salle_id) => {
                if salle_exists(runner, salle_id).await? {
                    plan.push(field, PatchValue::Param(QueryParam::Int(salle_id)));
                } else {
                    errors.push(salle_not_found(salle_id));
                }
            }
        }
    }

    Ok(if !errors.is_empty() {
        PatchResolution::Invalid(errors)
    } else if plan.is_empty() {
        PatchResolution::Empty
    } else {
        PatchResolution::Ready(plan)
    })
}
