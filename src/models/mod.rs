//! Data models for the reglements API.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod reglement;

// Re-export commonly used types
pub use connection::{BackendDescriptor, ConnectionConfigError, DatabaseType};
pub use query::{ExecutionResult, QueryParam, QuerySpec, Row};
pub use reglement::{Field, FieldKind, REGLEMENT_KEY, REGLEMENT_TABLE, SALLE_TABLE};
