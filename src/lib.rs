//! Reglements API library.
//!
//! A REST API over settlement records that runs unchanged on PostgreSQL or
//! MySQL. Statements are written once in PostgreSQL syntax; on MySQL the
//! dialect adapter in [`db`] rewrites them and emulates `RETURNING *`.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod server;

pub use config::Config;
pub use db::Database;
pub use error::DbError;
