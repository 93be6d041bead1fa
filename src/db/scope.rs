//! Connection scopes: one pooled connection pinned for a statement sequence.
//!
//! Multi-statement work (existence check then update, bulk transactions)
//! must see its own writes and hold its own transaction, so it runs on a
//! single connection taken out of the pool with [`Database::acquire`].
//!
//! [`Database::acquire`]: crate::db::Database::acquire

use crate::db::adapter::execute_adapted;
use crate::db::dialect::DialectAdapter;
use crate::db::executor;
use crate::db::normalize::normalize;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecutionResult, QuerySpec};
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub(crate) enum ScopedConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
}

/// A pinned connection.
///
/// Call [`release`](Self::release) when done. A scope dropped without being
/// released (handler error, cancelled request) may still hold an open
/// transaction, so its connection is detached and closed instead of going
/// back to the pool.
pub struct ConnectionScope {
    conn: Option<ScopedConnection>,
    db_type: DatabaseType,
    adapter: Arc<DialectAdapter>,
    acquired_at: Instant,
}

impl ConnectionScope {
    pub(crate) fn new(conn: ScopedConnection, adapter: Arc<DialectAdapter>) -> Self {
        let db_type = match conn {
            ScopedConnection::MySql(_) => DatabaseType::MySQL,
            ScopedConnection::Postgres(_) => DatabaseType::PostgreSQL,
        };
        Self {
            conn: Some(conn),
            db_type,
            adapter,
            acquired_at: Instant::now(),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Run one statement on the pinned connection.
    ///
    /// Same semantics as [`Database::query`](crate::db::Database::query).
    pub async fn query(&mut self, spec: &QuerySpec) -> DbResult<ExecutionResult> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(DbError::internal("Connection scope already released"));
        };
        match conn {
            ScopedConnection::MySql(conn) => execute_adapted(conn, &self.adapter, spec).await,
            ScopedConnection::Postgres(conn) => {
                debug!(sql = %spec.text, params = spec.params.len(), "Executing scoped query");
                executor::postgres::run(&mut **conn, &spec.text, &spec.params)
                    .await
                    .map(normalize)
                    .inspect_err(|e| error!(sql = %spec.text, error = %e, "Statement failed"))
            }
        }
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        if self.conn.take().is_some() {
            debug!(
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Connection scope released"
            );
        }
    }

    /// Close the connection instead of returning it to the pool.
    ///
    /// For when the session state is unknown, e.g. a failed ROLLBACK.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            detach(conn);
            warn!("Connection scope discarded; connection closed");
        }
    }
}

fn detach(conn: ScopedConnection) {
    match conn {
        ScopedConnection::MySql(conn) => drop(conn.detach()),
        ScopedConnection::Postgres(conn) => drop(conn.detach()),
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Connection scope dropped without release; closing connection"
            );
            detach(conn);
        }
    }
}
