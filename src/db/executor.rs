//! Statement execution against the sqlx drivers.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: runs statements already rewritten by the dialect adapter
//! - `postgres`: runs statements unchanged
//!
//! Both are generic over `sqlx::Executor`, so the same code serves a pool and
//! a connection pinned by a [`ConnectionScope`](crate::db::ConnectionScope).
//! Every statement is read through `fetch_many`, which yields both the rows
//! and the server's completion counts.

use crate::db::adapter::NativeExecutor;
use crate::db::dialect::AdaptedQuery;
use crate::db::normalize::NativeOutcome;
use crate::error::DbResult;
use sqlx::MySql;
use sqlx::MySqlPool;
use sqlx::pool::PoolConnection;
use std::future::Future;

pub(crate) mod mysql {
    use crate::db::dialect::{AdaptedQuery, ResultShape};
    use crate::db::normalize::NativeOutcome;
    use crate::db::params::bind_mysql_param;
    use crate::db::types::RowToJson;
    use crate::error::DbResult;
    use futures_util::TryStreamExt;
    use sqlx::{Either, Executor, MySql};

    pub async fn run<'c, E>(executor: E, query: &'c AdaptedQuery) -> DbResult<NativeOutcome>
    where
        E: Executor<'c, Database = MySql>,
    {
        // When params is empty, use raw SQL: transaction control statements
        // cannot be prepared.
        let mut stream = if query.params.is_empty() {
            executor.fetch_many(query.text.as_str())
        } else {
            let mut q = sqlx::query(query.text.as_str());
            for param in &query.params {
                q = bind_mysql_param(q, param);
            }
            executor.fetch_many(q)
        };

        let mut rows = Vec::new();
        let mut rows_affected = 0;
        let mut last_insert_id = None;
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                    last_insert_id = Some(done.last_insert_id());
                }
                Either::Right(row) => rows.push(row.to_json_map()),
            }
        }

        // MySQL reports no count for a SELECT; the row set length is the count.
        Ok(match query.shape {
            ResultShape::Rows => NativeOutcome::rows(rows),
            ResultShape::Count if !rows.is_empty() => NativeOutcome::rows(rows),
            ResultShape::Count => NativeOutcome::affected(rows_affected, last_insert_id),
        })
    }
}

pub(crate) mod postgres {
    use crate::db::normalize::NativeOutcome;
    use crate::db::params::bind_postgres_param;
    use crate::db::types::RowToJson;
    use crate::error::DbResult;
    use crate::models::QueryParam;
    use futures_util::TryStreamExt;
    use sqlx::{Either, Executor, Postgres};

    pub async fn run<'c, E>(
        executor: E,
        sql: &'c str,
        params: &'c [QueryParam],
    ) -> DbResult<NativeOutcome>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let mut stream = if params.is_empty() {
            executor.fetch_many(sql)
        } else {
            let mut q = sqlx::query(sql);
            for param in params {
                q = bind_postgres_param(q, param);
            }
            executor.fetch_many(q)
        };

        let mut rows = Vec::new();
        let mut rows_affected = 0;
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(row.to_json_map()),
            }
        }
        Ok(NativeOutcome::Rows {
            rows,
            rows_affected,
        })
    }
}

impl NativeExecutor for MySqlPool {
    fn execute_native<'a>(
        &'a mut self,
        query: &'a AdaptedQuery,
    ) -> impl Future<Output = DbResult<NativeOutcome>> + Send + 'a {
        mysql::run(&*self, query)
    }
}

impl NativeExecutor for PoolConnection<MySql> {
    fn execute_native<'a>(
        &'a mut self,
        query: &'a AdaptedQuery,
    ) -> impl Future<Output = DbResult<NativeOutcome>> + Send + 'a {
        mysql::run(&mut **self, query)
    }
}
