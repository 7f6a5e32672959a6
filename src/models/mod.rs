//! Data models for the credential engine.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod credential;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DsnForm};
pub use credential::{Credential, EXPIRATION_FORMAT, expiration_after, format_expiration};
