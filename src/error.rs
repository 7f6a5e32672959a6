//! Error types for the credential engine.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each error variant carries enough context for the calling secret backend to decide
//! whether a retry makes sense and what to tell the operator.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use thiserror::Error;

/// A single revocation statement (or the schema discovery query) that did not
/// complete successfully during the default revocation cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationFailure {
    /// The statement that failed, was skipped, or is in an unknown state.
    pub statement: String,
    /// Rendered driver error or outcome description.
    pub error: String,
}

impl std::fmt::Display for RevocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}`: {}", self.statement, self.error)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42704" for undefined object
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Transaction {phase} failed at statement {statement_index}: {source}")]
    Transaction {
        /// "begin", "execute" or "commit".
        phase: String,
        /// Zero-based index of the failing statement, or the statement count for commit.
        statement_index: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(
        "Revocation of role '{role}' incomplete; role was not dropped ({} failure(s), first: {})",
        .failures.len(),
        first_failure(.failures)
    )]
    RevocationIncomplete {
        role: String,
        failures: Vec<RevocationFailure>,
    },
}

fn first_failure(failures: &[RevocationFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none recorded".to_string())
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Wrap a failure that aborted a transaction; the transaction was rolled back.
    pub fn transaction(phase: impl Into<String>, statement_index: usize, source: DbError) -> Self {
        Self::Transaction {
            phase: phase.into(),
            statement_index,
            source: Box::new(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an incomplete revocation error.
    pub fn revocation_incomplete(role: impl Into<String>, failures: Vec<RevocationFailure>) -> Self {
        Self::RevocationIncomplete {
            role: role.into(),
            failures,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Transaction { source, .. } => source.suggestion(),
            Self::RevocationIncomplete { .. } => {
                Some("The role still exists with some privileges; retry the revocation")
            }
            _ => None,
        }
    }

    /// Get the SQLSTATE code, looking through transaction wrappers.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::Transaction { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::RevocationIncomplete { .. } => true,
            Self::Transaction { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the statement template and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
