//! Integration tests for the MySQL adapted execution pipeline.
//!
//! A recording executor stands in for the driver: it captures every adapted
//! statement and replays scripted outcomes.

use reglements_api::db::{AdaptedQuery, DialectAdapter, NativeExecutor, NativeOutcome, execute_adapted};
use reglements_api::error::{DbError, DbResult};
use reglements_api::models::{QueryParam, QuerySpec, Row};
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;

#[derive(Default)]
struct RecordingExecutor {
    executed: Vec<AdaptedQuery>,
    outcomes: VecDeque<DbResult<NativeOutcome>>,
}

impl RecordingExecutor {
    fn with_outcomes(outcomes: Vec<DbResult<NativeOutcome>>) -> Self {
        Self {
            executed: Vec::new(),
            outcomes: outcomes.into(),
        }
    }
}

impl NativeExecutor for RecordingExecutor {
    fn execute_native<'a>(
        &'a mut self,
        query: &'a AdaptedQuery,
    ) -> impl Future<Output = DbResult<NativeOutcome>> + Send + 'a {
        self.executed.push(query.clone());
        let outcome = self
            .outcomes
            .pop_front()
            .unwrap_or_else(|| Ok(NativeOutcome::rows(Vec::new())));
        async move { outcome }
    }
}

fn row(pairs: serde_json::Value) -> Row {
    pairs.as_object().unwrap().clone()
}

#[tokio::test]
async fn test_select_rewritten_and_rows_returned() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::rows(vec![
        row(json!({"id": 5, "name": "a"})),
    ]))]);
    let spec = QuerySpec::new("SELECT * FROM \"T\" WHERE \"id\" = $1").bind(5i64);

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed.len(), 1);
    assert_eq!(exec.executed[0].text, "SELECT * FROM `T` WHERE `id` = ?");
    assert_eq!(exec.executed[0].params, vec![QueryParam::Int(5)]);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("a"));
}

#[tokio::test]
async fn test_placeholder_order_preserved() {
    let mut exec = RecordingExecutor::default();
    let spec = QuerySpec::new("SELECT $1, $2, $3")
        .bind("a")
        .bind(2i64)
        .bind(true);

    execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed[0].text, "SELECT ?, ?, ?");
    assert_eq!(
        exec.executed[0].params,
        vec![
            QueryParam::String("a".into()),
            QueryParam::Int(2),
            QueryParam::Bool(true)
        ]
    );
}

#[tokio::test]
async fn test_insert_returning_reads_back_generated_row() {
    let inserted = row(json!({"ID_reglement": 42, "CLIENT": "ACME"}));
    let mut exec = RecordingExecutor::with_outcomes(vec![
        Ok(NativeOutcome::affected(1, Some(42))),
        Ok(NativeOutcome::rows(vec![inserted.clone()])),
    ]);
    let spec = QuerySpec::new(
        "INSERT INTO \"API_user_reglement\" (\"CLIENT\", \"DATE_CONTRAT\") VALUES ($1, $2) RETURNING *",
    )
    .bind("ACME")
    .bind("2024-03-01T10:15:30.123Z");

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed.len(), 2);
    assert_eq!(
        exec.executed[0].text,
        "INSERT INTO `API_user_reglement` (`CLIENT`, `DATE_CONTRAT`) VALUES (?, ?)"
    );
    assert_eq!(
        exec.executed[0].params[1],
        QueryParam::String("2024-03-01 10:15:30".into())
    );
    assert_eq!(
        exec.executed[1].text,
        "SELECT * FROM `API_user_reglement` WHERE `ID_reglement` = ?"
    );
    assert_eq!(exec.executed[1].params, vec![QueryParam::Int(42)]);
    assert_eq!(result.rows, vec![inserted]);
    assert_eq!(result.row_count, 1);
}

#[tokio::test]
async fn test_insert_returning_uses_configured_key_column() {
    let mut exec = RecordingExecutor::with_outcomes(vec![
        Ok(NativeOutcome::affected(1, Some(7))),
        Ok(NativeOutcome::rows(vec![row(json!({"id": 7}))])),
    ]);
    let spec = QuerySpec::new("INSERT INTO \"items\" (\"name\") VALUES ($1) RETURNING *").bind("x");

    execute_adapted(&mut exec, &DialectAdapter::new("id"), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed[1].text, "SELECT * FROM `items` WHERE `id` = ?");
}

#[tokio::test]
async fn test_insert_returning_without_generated_key() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(1, None))]);
    let spec = QuerySpec::new("INSERT INTO \"T\" (\"code\") VALUES ($1) RETURNING *").bind("k");

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed.len(), 1);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["affectedRows"], json!(1));
}

#[tokio::test]
async fn test_update_returning_yields_affected_count() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(3, None))]);
    let spec = QuerySpec::new(
        "UPDATE \"API_user_reglement\" SET \"CLIENT\" = $1 WHERE \"FAMILLE\" = $2 RETURNING *",
    )
    .bind("ACME")
    .bind("F");

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(
        exec.executed[0].text,
        "UPDATE `API_user_reglement` SET `CLIENT` = ? WHERE `FAMILLE` = ?"
    );
    assert_eq!(result.row_count, 3);
    assert_eq!(result.rows, vec![row(json!({"affectedRows": 3}))]);
}

#[tokio::test]
async fn test_update_returning_with_no_match_is_normalized() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(0, None))]);
    let spec = QuerySpec::new("UPDATE \"T\" SET \"a\" = $1 WHERE \"id\" = $2 RETURNING *")
        .bind(1i64)
        .bind(99i64);

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(result.row_count, 0);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["affectedRows"], json!(0));
}

#[tokio::test]
async fn test_delete_returning_falls_back_to_count() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(1, None))]);
    let spec = QuerySpec::new("DELETE FROM \"T\" WHERE \"id\" = $1 RETURNING *").bind(1i64);

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(exec.executed[0].text, "DELETE FROM `T` WHERE `id` = ?");
    assert_eq!(result.row_count, 1);
}

#[tokio::test]
async fn test_execution_error_propagates() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Err(DbError::database(
        "Duplicate entry '1' for key 'PRIMARY'",
        Some("23000".to_string()),
        "Check constraints",
    ))]);
    let spec = QuerySpec::new("INSERT INTO \"T\" (\"id\") VALUES ($1)").bind(1i64);

    let err = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap_err();

    assert_eq!(err.sql_state(), Some("23000"));
    assert_eq!(exec.executed.len(), 1);
}

#[tokio::test]
async fn test_lookup_error_propagates() {
    let mut exec = RecordingExecutor::with_outcomes(vec![
        Ok(NativeOutcome::affected(1, Some(8))),
        Err(DbError::internal("lost connection")),
    ]);
    let spec = QuerySpec::new("INSERT INTO \"T\" (\"a\") VALUES ($1) RETURNING *").bind(1i64);

    let err = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("lost connection"));
    assert_eq!(exec.executed.len(), 2);
}

#[tokio::test]
async fn test_count_only_outcome_normalized() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(2, None))]);
    let spec = QuerySpec::new("DELETE FROM \"T\" WHERE \"flag\" = $1").bind(true);

    let result = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["affectedRows"], json!(2));
}

#[tokio::test]
async fn test_transaction_control_passes_through() {
    let mut exec = RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(0, None))]);

    execute_adapted(&mut exec, &DialectAdapter::default(), &QuerySpec::new("BEGIN"))
        .await
        .unwrap();

    assert_eq!(exec.executed[0].text, "BEGIN");
    assert!(exec.executed[0].params.is_empty());
    assert!(exec.executed[0].returning.is_none());
}

#[tokio::test]
async fn test_generated_key_beyond_i64_is_an_error() {
    let mut exec =
        RecordingExecutor::with_outcomes(vec![Ok(NativeOutcome::affected(1, Some(u64::MAX)))]);
    let spec = QuerySpec::new("INSERT INTO \"T\" (\"a\") VALUES ($1) RETURNING *").bind(1i64);

    let err = execute_adapted(&mut exec, &DialectAdapter::default(), &spec)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Internal { .. }));
    assert_eq!(exec.executed.len(), 1);
}
