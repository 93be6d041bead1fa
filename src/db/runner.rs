//! Common query entry point for the pool and pinned connections.

use crate::db::pool::Database;
use crate::db::scope::ConnectionScope;
use crate::error::DbResult;
use crate::models::{DatabaseType, ExecutionResult, QuerySpec};
use std::future::Future;

/// Anything a handler can run statements on.
///
/// Lets record-level logic (existence checks, salle lookups, updates) run
/// unchanged on the pool or inside a bulk transaction.
pub trait QueryRunner: Send {
    fn db_type(&self) -> DatabaseType;

    fn run<'a>(
        &'a mut self,
        spec: &'a QuerySpec,
    ) -> impl Future<Output = DbResult<ExecutionResult>> + Send + 'a;
}

/// A [`QueryRunner`] pinned to one connection, ended exactly once.
///
/// Transactions run on one of these: the connection either goes back to the
/// pool or, when its session state is unknown, is closed.
pub trait PinnedRunner: QueryRunner + Sized {
    /// Return the connection to the pool.
    fn release(self);

    /// Close the connection instead of returning it.
    fn discard(self);
}

impl QueryRunner for Database {
    fn db_type(&self) -> DatabaseType {
        Database::db_type(self)
    }

    fn run<'a>(
        &'a mut self,
        spec: &'a QuerySpec,
    ) -> impl Future<Output = DbResult<ExecutionResult>> + Send + 'a {
        self.query(spec)
    }
}

impl QueryRunner for ConnectionScope {
    fn db_type(&self) -> DatabaseType {
        ConnectionScope::db_type(self)
    }

    fn run<'a>(
        &'a mut self,
        spec: &'a QuerySpec,
    ) -> impl Future<Output = DbResult<ExecutionResult>> + Send + 'a {
        self.query(spec)
    }
}

impl PinnedRunner for ConnectionScope {
    fn release(self) {
        ConnectionScope::release(self)
    }

    fn discard(self) {
        ConnectionScope::discard(self)
    }
}
