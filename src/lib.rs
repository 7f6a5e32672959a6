//! PostgreSQL Credential Engine Library
//!
//! This library manages the lifecycle of short-lived PostgreSQL credentials:
//! it creates roles with a bounded validity window, renews them, and revokes
//! and drops them when they expire or are returned.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use backend::PostgresBackend;
pub use config::Config;
pub use error::{DbError, DbResult};
