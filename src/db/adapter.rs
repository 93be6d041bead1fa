//! Adapted execution pipeline for MySQL.
//!
//! [`execute_adapted`] is the single path every MySQL statement takes, pooled
//! or scoped: rewrite, run, emulate `RETURNING *`, normalize. The driver sits
//! behind [`NativeExecutor`] so the pipeline can run against a pool, a pinned
//! connection or an in-memory recorder in tests.

use crate::db::dialect::{AdaptedQuery, DialectAdapter, ReturningIntent, StatementKind};
use crate::db::normalize::{NativeOutcome, normalize};
use crate::error::DbResult;
use crate::models::{ExecutionResult, QuerySpec};
use std::future::Future;
use tracing::{debug, error, warn};

/// Something that can run an already-adapted statement.
pub trait NativeExecutor: Send {
    /// Run one statement and report its raw outcome.
    ///
    /// Implementations read rows when `query.shape` is `Rows` and an
    /// affected count otherwise.
    fn execute_native<'a>(
        &'a mut self,
        query: &'a AdaptedQuery,
    ) -> impl Future<Output = DbResult<NativeOutcome>> + Send + 'a;
}

/// Adapt `spec`, run it on `executor` and return the uniform result.
pub async fn execute_adapted<E: NativeExecutor>(
    executor: &mut E,
    adapter: &DialectAdapter,
    spec: &QuerySpec,
) -> DbResult<ExecutionResult> {
    let adapted = adapter.adapt(spec);
    debug!(
        sql = %adapted.text,
        params = adapted.params.len(),
        returning = ?adapted.returning.as_ref().map(|r| r.kind),
        "Executing adapted statement"
    );

    let outcome = run(executor, &adapted).await?;

    match &adapted.returning {
        Some(ReturningIntent {
            kind: StatementKind::Insert,
            table: Some(table),
        }) => match outcome.last_insert_id() {
            Some(insert_id) => {
                let lookup = adapter.lookup_inserted(table, insert_id)?;
                debug!(sql = %lookup.text, insert_id, "Reading back inserted row");
                let rows = run(executor, &lookup).await?;
                Ok(normalize(rows))
            }
            None => {
                warn!(
                    table = %table,
                    "Insert reported no generated key; returning affected count instead of the row"
                );
                Ok(normalize(outcome))
            }
        },
        Some(ReturningIntent {
            kind: StatementKind::Update,
            table: Some(table),
        }) if outcome.rows_affected() > 0 => {
            let affected = outcome.rows_affected();
            warn!(
                table = %table,
                affected,
                "MySQL cannot return updated rows; returning affected count only"
            );
            Ok(ExecutionResult::affected_only(affected))
        }
        _ => Ok(normalize(outcome)),
    }
}

async fn run<E: NativeExecutor>(
    executor: &mut E,
    query: &AdaptedQuery,
) -> DbResult<NativeOutcome> {
    executor.execute_native(query).await.map_err(|e| {
        error!(sql = %query.text, error = %e, "Statement failed");
        e
    })
}
