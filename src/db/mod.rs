//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management and backend selection
//! - PostgreSQL to MySQL dialect adaptation
//! - Query execution and result normalization
//! - Type mappings from driver rows to JSON
//! - Connection scopes for multi-statement work

pub mod adapter;
pub mod dialect;
pub mod executor;
pub mod normalize;
pub mod params;
pub mod pool;
pub mod runner;
pub mod scope;
pub mod types;

pub use adapter::{NativeExecutor, execute_adapted};
pub use dialect::{AdaptedQuery, DialectAdapter, ResultShape, ReturningIntent, StatementKind};
pub use normalize::NativeOutcome;
pub use pool::{Database, DbPool};
pub use runner::{PinnedRunner, QueryRunner};
pub use scope::ConnectionScope;
