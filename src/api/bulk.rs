//! Bulk routes: many records in one transaction on one pinned connection.
//!
//! Per-item failures are reported, not fatal. Each item runs under a
//! savepoint so a failed statement does not abort the whole PostgreSQL
//! transaction; only failures of the transaction itself roll everything back.

use super::reglements::{
    PatchResolution, delete_reglement, find_reglement, resolve_patch, salle_exists,
    salle_not_found,
};
use super::validation::{js_int, is_truthy, validate_full};
use super::{ApiError, AppState, JsonBody};
use crate::db::{PinnedRunner, QueryRunner};
use crate::error::{DbError, DbResult};
use crate::models::{QuerySpec, Row};
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

const SAVEPOINT: &str = "SAVEPOINT bulk_item";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT bulk_item";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT bulk_item";

/// Outcome of one bulk item.
enum Item {
    Done(JsonValue),
    /// Error entry for `errorDetails`.
    Rejected(JsonValue),
}

/// `POST /api/reglements/bulk`
pub async fn create_many(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let items = non_empty_array(&body, "reglements")
        .ok_or_else(|| ApiError::bad_request("reglements array is required and must not be empty"))?;

    let mut scope = state
        .db
        .acquire()
        .await
        .map_err(state.db_error("Failed to insert reglements"))?;
    let result = insert_items(&mut scope, items).await;
    let (inserted, errors) = finish(scope, result)
        .await
        .map_err(state.db_error("Failed to insert reglements"))?;
    info!(inserted = inserted.len(), rejected = errors.len(), "Bulk insert committed");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Successfully inserted {} reglements", inserted.len()),
            "inserted": inserted.len(),
            "errors": errors.len(),
            "data": inserted,
            "errorDetails": errors,
        })),
    ))
}

async fn insert_items<R: QueryRunner>(
    scope: &mut R,
    items: &[JsonValue],
) -> DbResult<(Vec<JsonValue>, Vec<JsonValue>)> {
    execute(scope, "BEGIN").await?;
    let mut inserted = Vec::new();
    let mut errors = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let record = match validate_full(item) {
            Ok(record) => record,
            Err(validation) => {
                errors.push(json!({ "index": index, "errors": validation, "data": item }));
                continue;
            }
        };

        execute(scope, SAVEPOINT).await?;
        let outcome = async {
            if !salle_exists(scope, record.salle_id).await? {
                return Ok(Item::Rejected(json!({
                    "index": index,
                    "errors": [salle_not_found(record.salle_id)],
                    "data": item,
                })));
            }
            let row = scope.run(&record.insert_query()).await?.into_first();
            Ok::<_, DbError>(Item::Done(json!(row)))
        }
        .await;

        match settle(scope, outcome).await? {
            Ok(Item::Done(row)) => inserted.push(row),
            Ok(Item::Rejected(entry)) => errors.push(entry),
            Err(e) => errors.push(json!({ "index": index, "error": e.to_string(), "data": item })),
        }
    }

    execute(scope, "COMMIT").await?;
    Ok((inserted, errors))
}

/// `PATCH /api/reglements/bulk/update`
pub async fn update_many(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<Json<JsonValue>, ApiError> {
    let items = non_empty_array(&body, "updates")
        .ok_or_else(|| ApiError::bad_request("updates array is required and must not be empty"))?;

    let mut updates = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let raw_id = item.get("id").unwrap_or(&JsonValue::Null);
        let id = is_truthy(raw_id).then(|| js_int(raw_id)).flatten().ok_or_else(|| {
            ApiError::bad_request(format!(
                "Update at index {} must have a valid numeric id",
                index
            ))
        })?;
        updates.push((id, raw_id, item));
    }

    let mut scope = state
        .db
        .acquire()
        .await
        .map_err(state.db_error("Failed to update reglements"))?;
    let result = update_items(&mut scope, &updates).await;
    let (updated, errors) = finish(scope, result)
        .await
        .map_err(state.db_error("Failed to update reglements"))?;
    info!(updated = updated.len(), rejected = errors.len(), "Bulk update committed");

    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully updated {} reglements", updated.len()),
        "updated": updated.len(),
        "errors": errors.len(),
        "data": updated,
        "errorDetails": errors,
    })))
}

async fn update_items<R: QueryRunner>(
    scope: &mut R,
    updates: &[(i64, &JsonValue, &JsonValue)],
) -> DbResult<(Vec<JsonValue>, Vec<JsonValue>)> {
    execute(scope, "BEGIN").await?;
    let mut updated = Vec::new();
    let mut errors = Vec::new();

    for (index, &(id, raw_id, item)) in updates.iter().enumerate() {
        let mut fields = item.as_object().cloned().unwrap_or_default();
        fields.remove("id");
        let rejected = |error: &str| json!({ "index": index, "id": raw_id, "error": error });

        execute(scope, SAVEPOINT).await?;
        let outcome = async {
            if find_reglement(scope, id).await?.is_none() {
                return Ok(Item::Rejected(rejected("Reglement not found")));
            }
            if fields.is_empty() {
                return Ok(Item::Rejected(rejected(
                    "At least one field must be provided for update",
                )));
            }
            let plan = match resolve_patch(scope, &fields).await? {
                PatchResolution::Ready(plan) => plan,
                PatchResolution::Invalid(validation) => {
                    return Ok(Item::Rejected(
                        json!({ "index": index, "id": raw_id, "errors": validation }),
                    ));
                }
                PatchResolution::Empty => {
                    return Ok(Item::Rejected(rejected("No valid fields provided for update")));
                }
            };
            let mut row = scope
                .run(&plan.update_query(id))
                .await?
                .into_first()
                .unwrap_or_default();
            row.insert("updatedFields".to_string(), json!(plan.field_names()));
            Ok::<_, DbError>(Item::Done(JsonValue::Object(row)))
        }
        .await;

        match settle(scope, outcome).await? {
            Ok(Item::Done(row)) => updated.push(row),
            Ok(Item::Rejected(entry)) => errors.push(entry),
            Err(e) => errors.push(rejected(&e.to_string())),
        }
    }

    execute(scope, "COMMIT").await?;
    Ok((updated, errors))
}

/// `DELETE /api/reglements/bulk/delete`
pub async fn delete_many(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> Result<Json<JsonValue>, ApiError> {
    let ids = non_empty_array(&body, "ids")
        .ok_or_else(|| ApiError::bad_request("ids array is required and must not be empty"))?;

    let invalid_ids: Vec<JsonValue> = ids
        .iter()
        .filter(|id| js_int(id).is_none())
        .cloned()
        .collect();
    if !invalid_ids.is_empty() {
        return Err(ApiError::InvalidIds {
            error: "All IDs must be valid numbers".to_string(),
            invalid_ids,
        });
    }

    let mut scope = state
        .db
        .acquire()
        .await
        .map_err(state.db_error("Failed to delete reglements"))?;
    let result = delete_items(&mut scope, ids).await;
    let (deleted, not_found) = finish(scope, result)
        .await
        .map_err(state.db_error("Failed to delete reglements"))?;
    info!(deleted = deleted.len(), not_found = not_found.len(), "Bulk delete committed");

    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully deleted {} reglements", deleted.len()),
        "deleted": deleted.len(),
        "notFound": not_found.len(),
        "deletedReglements": deleted,
        "notFoundIds": not_found,
    })))
}

async fn delete_items<R: QueryRunner>(
    scope: &mut R,
    ids: &[JsonValue],
) -> DbResult<(Vec<Row>, Vec<JsonValue>)> {
    execute(scope, "BEGIN").await?;
    let mut deleted = Vec::new();
    let mut not_found = Vec::new();

    for raw_id in ids {
        let Some(id) = js_int(raw_id) else {
            not_found.push(raw_id.clone());
            continue;
        };

        execute(scope, SAVEPOINT).await?;
        let outcome = async {
            match find_reglement(scope, id).await? {
                Some(existing) => delete_reglement(scope, id, existing).await.map(Some),
                None => Ok(None),
            }
        }
        .await;

        match settle(scope, outcome).await? {
            Ok(Some(row)) => deleted.push(row),
            Ok(None) => not_found.push(raw_id.clone()),
            Err(e) => {
                warn!(id, error = %e, "Bulk delete item failed");
                not_found.push(raw_id.clone());
            }
        }
    }

    execute(scope, "COMMIT").await?;
    Ok((deleted, not_found))
}

fn non_empty_array<'a>(body: &'a JsonValue, key: &str) -> Option<&'a [JsonValue]> {
    body.get(key)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .filter(|items| !items.is_empty())
}

async fn execute<R: QueryRunner>(scope: &mut R, sql: &str) -> DbResult<()> {
    scope.run(&QuerySpec::new(sql)).await.map(|_| ())
}

/// Close an item's savepoint: release it on success, roll back to it on
/// failure. The outer `DbResult` is a transaction-level failure, the inner
/// one the item's own.
async fn settle<R: QueryRunner, T>(scope: &mut R, outcome: DbResult<T>) -> DbResult<DbResult<T>> {
    match outcome {
        Ok(value) => {
            execute(scope, RELEASE_SAVEPOINT).await?;
            Ok(Ok(value))
        }
        Err(e) => {
            execute(scope, ROLLBACK_TO_SAVEPOINT).await?;
            Ok(Err(e))
        }
    }
}

/// Release `scope` after a transaction, rolling back first if it failed.
///
/// A scope whose ROLLBACK also fails is discarded rather than returned to
/// the pool.
async fn finish<R: PinnedRunner, T>(mut scope: R, result: DbResult<T>) -> DbResult<T> {
    match result {
        Ok(value) => {
            scope.release();
            Ok(value)
        }
        Err(e) => {
            warn!(error = %e, "Bulk transaction failed, rolling back");
            match execute(&mut scope, "ROLLBACK").await {
                Ok(()) => scope.release(),
                Err(rollback) => {
                    warn!(error = %rollback, "ROLLBACK failed");
                    scope.discard();
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseType, ExecutionResult, QueryParam};
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    /// Stands in for a pinned connection: logs every statement and how the
    /// scope ended, and fails chosen statements.
    struct RecordingRunner {
        log: Arc<Mutex<Vec<String>>>,
        /// `(prefix, n)`: the n-th statement starting with `prefix` fails.
        failures: Vec<(&'static str, usize)>,
    }

    impl RecordingRunner {
        fn new(failures: Vec<(&'static str, usize)>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let runner = Self {
                log: Arc::clone(&log),
                failures,
            };
            (runner, log)
        }

        fn respond(&mut self, spec: &QuerySpec) -> DbResult<ExecutionResult> {
            let sql = spec.text.as_str();
            let mut log = self.log.lock().unwrap();
            log.push(label(sql));
            for &(prefix, n) in &self.failures {
                let seen = log.iter().filter(|s| s.starts_with(prefix)).count();
                if sql.starts_with(prefix) && seen == n {
                    return Err(DbError::database(
                        format!("{} failed", prefix),
                        Some("40001".to_string()),
                        "Retry the request",
                    ));
                }
            }

            let id = match spec.params.last() {
                Some(QueryParam::Int(id)) => *id,
                _ => 1,
            };
            let row = json!({ "ID_reglement": id });
            Ok(match label(sql).as_str() {
                "SELECT" | "INSERT" | "UPDATE" | "DELETE" => {
                    ExecutionResult::from_rows(vec![row.as_object().unwrap().clone()])
                }
                _ => ExecutionResult::affected_only(0),
            })
        }
    }

    impl QueryRunner for RecordingRunner {
        fn db_type(&self) -> DatabaseType {
            DatabaseType::PostgreSQL
        }

        fn run<'a>(
            &'a mut self,
            spec: &'a QuerySpec,
        ) -> impl Future<Output = DbResult<ExecutionResult>> + Send + 'a {
            let result = self.respond(spec);
            async move { result }
        }
    }

    impl PinnedRunner for RecordingRunner {
        fn release(self) {
            self.log.lock().unwrap().push("release".to_string());
        }

        fn discard(self) {
            self.log.lock().unwrap().push("discard".to_string());
        }
    }

    /// First keyword for data statements, full text for transaction control.
    fn label(sql: &str) -> String {
        match sql.split_whitespace().next() {
            Some(word @ ("SELECT" | "INSERT" | "UPDATE" | "DELETE")) => word.to_string(),
            _ => sql.to_string(),
        }
    }

    fn statements(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn record() -> JsonValue {
        json!({
            "id_salle": 1,
            "CONTRAT": "C-1",
            "CLIENT": "ACME",
            "DATE_CONTRAT": "2024-03-01T10:15:30Z",
            "DATE_DEBUT": "2024-03-01",
            "DATE_FIN": "2024-12-31",
            "USERC": "agent",
            "FAMILLE": "F",
            "SOUSFAMILLE": "SF",
            "LIBELLE": "L",
            "DATE_ASSURANCE": "2024-03-01",
            "MONTANT": 10.5,
            "MODE": "CB",
            "TARIFAIRE": "T",
            "DATE_REGLEMENT": "2024-03-02"
        })
    }

    #[test]
    fn test_non_empty_array() {
        let body = json!({ "ids": [1, 2], "empty": [], "scalar": 3 });
        assert_eq!(non_empty_array(&body, "ids").map(<[_]>::len), Some(2));
        assert!(non_empty_array(&body, "empty").is_none());
        assert!(non_empty_array(&body, "scalar").is_none());
        assert!(non_empty_array(&body, "missing").is_none());
    }

    #[tokio::test]
    async fn test_bulk_insert_isolates_failed_item() {
        let (mut runner, log) = RecordingRunner::new(vec![("INSERT", 2)]);
        let items = vec![record(), record(), json!({})];

        let result = insert_items(&mut runner, &items).await;
        let (inserted, errors) = finish(runner, result).await.unwrap();

        assert_eq!(inserted.len(), 1);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["index"], 1);
        assert_eq!(errors[0]["error"], "Database error: INSERT failed");
        assert_eq!(errors[1]["index"], 2);
        assert_eq!(errors[1]["errors"].as_array().unwrap().len(), 15);
        assert_eq!(
            statements(&log),
            vec![
                "BEGIN",
                SAVEPOINT,
                "SELECT",
                "INSERT",
                RELEASE_SAVEPOINT,
                SAVEPOINT,
                "SELECT",
                "INSERT",
                ROLLBACK_TO_SAVEPOINT,
                "COMMIT",
                "release",
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_update_isolates_failed_item() {
        let (mut runner, log) = RecordingRunner::new(vec![("UPDATE", 2)]);
        let first = json!({ "id": 1, "CLIENT": "a" });
        let second = json!({ "id": 2, "CLIENT": "b" });
        let updates = vec![(1, &first["id"], &first), (2, &second["id"], &second)];

        let result = update_items(&mut runner, &updates).await;
        let (updated, errors) = finish(runner, result).await.unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["updatedFields"], json!(["CLIENT"]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["id"], 2);
        assert_eq!(
            statements(&log),
            vec![
                "BEGIN",
                SAVEPOINT,
                "SELECT",
                "UPDATE",
                RELEASE_SAVEPOINT,
                SAVEPOINT,
                "SELECT",
                "UPDATE",
                ROLLBACK_TO_SAVEPOINT,
                "COMMIT",
                "release",
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_delete_reports_failed_item_as_not_found() {
        let (mut runner, log) = RecordingRunner::new(vec![("DELETE", 1)]);
        let ids = vec![json!(1), json!("2")];

        let result = delete_items(&mut runner, &ids).await;
        let (deleted, not_found) = finish(runner, result).await.unwrap();

        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0]["ID_reglement"], 2);
        assert_eq!(not_found, vec![json!(1)]);
        assert_eq!(
            statements(&log),
            vec![
                "BEGIN",
                SAVEPOINT,
                "SELECT",
                "DELETE",
                ROLLBACK_TO_SAVEPOINT,
                SAVEPOINT,
                "SELECT",
                "DELETE",
                RELEASE_SAVEPOINT,
                "COMMIT",
                "release",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_and_releases() {
        let (mut runner, log) = RecordingRunner::new(vec![("COMMIT", 1)]);
        let items = vec![record()];

        let result = insert_items(&mut runner, &items).await;
        let err = finish(runner, result).await.unwrap_err();

        assert_eq!(err.sql_state(), Some("40001"));
        let log = statements(&log);
        assert_eq!(log[log.len() - 3..].to_vec(), vec!["COMMIT", "ROLLBACK", "release"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_discards_connection() {
        let (mut runner, log) = RecordingRunner::new(vec![("COMMIT", 1), ("ROLLBACK", 1)]);
        let items = vec![record()];

        let result = insert_items(&mut runner, &items).await;
        assert!(finish(runner, result).await.is_err());

        let log = statements(&log);
        assert_eq!(log[log.len() - 3..].to_vec(), vec!["COMMIT", "ROLLBACK", "discard"]);
        assert!(!log.contains(&"release".to_string()));
    }

    #[tokio::test]
    async fn test_failed_begin_ends_scope_once() {
        let (mut runner, log) = RecordingRunner::new(vec![("BEGIN", 1)]);
        let ids = vec![json!(1)];

        let result = delete_items(&mut runner, &ids).await;
        assert!(finish(runner, result).await.is_err());

        assert_eq!(statements(&log), vec!["BEGIN", "ROLLBACK", "release"]);
    }
}
