//! Connection-related data models.
//!
//! This module defines the immutable connection configuration snapshot held by
//! the connection manager.

use serde::{Deserialize, Serialize};

/// Syntax of a PostgreSQL connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnForm {
    /// `postgres://` or `postgresql://` URL.
    Url,
    /// libpq-style `key=value` pairs separated by whitespace.
    KeyValue,
}

impl DsnForm {
    /// Detect the form of a connection string.
    pub fn detect(connection_string: &str) -> Self {
        if connection_string.starts_with("postgres://")
            || connection_string.starts_with("postgresql://")
        {
            Self::Url
        } else {
            Self::KeyValue
        }
    }
}

/// Configuration for the managed database connection.
///
/// A snapshot is never mutated in place; `ConnectionManager::reset` swaps the
/// whole value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// 0 means use the driver default.
    #[serde(default)]
    pub max_open_connections: u32,
    /// Connections the pool keeps open while idle. This is a floor (sqlx
    /// `min_connections`), not a cap on idle connections, and never exceeds
    /// the open limit.
    #[serde(default)]
    pub max_idle_connections: u32,
}

impl ConnectionConfig {
    /// Create a new connection configuration with default pool limits.
    pub fn new(connection_string: impl Into<String>) -> Result<Self, ConnectionConfigError> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(ConnectionConfigError::EmptyConnectionString);
        }
        Ok(Self {
            connection_string,
            max_open_connections: 0,
            max_idle_connections: 0,
        })
    }

    /// Set the pool limits.
    pub fn with_pool_limits(mut self, max_open: u32, max_idle: u32) -> Self {
        self.max_open_connections = max_open;
        self.max_idle_connections = max_idle;
        self
    }

    /// The connection string with the session timezone forced to UTC.
    ///
    /// URL connection strings get a `timezone=utc` query parameter, key/value
    /// connection strings get a trailing ` timezone=utc` pair.
    pub fn utc_connection_string(&self) -> String {
        let conn = &self.connection_string;
        match DsnForm::detect(conn) {
            DsnForm::Url if conn.contains('?') => format!("{conn}&timezone=utc"),
            DsnForm::Url => format!("{conn}?timezone=utc"),
            DsnForm::KeyValue => format!("{conn} timezone=utc"),
        }
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        match DsnForm::detect(&self.connection_string) {
            DsnForm::Url => match url::Url::parse(&self.connection_string) {
                Ok(mut url) if url.password().is_some() => {
                    // set_password only fails for cannot-be-a-base URLs
                    let _ = url.set_password(Some("****"));
                    url.to_string()
                }
                Ok(url) => url.to_string(),
                Err(_) => "<unparseable url>".to_string(),
            },
            DsnForm::KeyValue => self
                .connection_string
                .split_whitespace()
                .map(|pair| match pair.split_once('=') {
                    Some((key, _)) if key.eq_ignore_ascii_case("password") => {
                        format!("{key}=****")
                    }
                    _ => pair.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connection_string", &self.masked_connection_string())
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .finish()
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Connection string cannot be empty")]
    EmptyConnectionString,
}
