//! Driver capability traits.
//!
//! The engine never talks to a SQL client library directly. Everything it
//! needs from the database (open, ping, prepare + execute, simple queries and
//! transactions) goes through these traits, which keeps the lifecycle logic
//! independent from the transport. `crate::db::postgres` provides the sqlx
//! implementation used in production.

use crate::error::DbResult;
use crate::models::ConnectionConfig;
use std::future::Future;

/// Opens pooled handles from a connection configuration.
pub trait Driver: Send + Sync + 'static {
    type Handle: DbHandle;

    /// Open a new handle. Implementations force the session timezone to UTC
    /// and apply the pool limits from `config`.
    fn open(&self, config: &ConnectionConfig)
    -> impl Future<Output = DbResult<Self::Handle>> + Send;
}

/// A live, internally pooled connection handle.
///
/// A handle must be safe for concurrent use through `&self`.
pub trait DbHandle: Send + Sync + 'static {
    type Transaction: DbTransaction;

    /// Health check.
    fn ping(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close the handle. Errors are ignored; the handle is discarded anyway.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Prepare and execute a single statement outside any transaction.
    fn execute(&self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send;

    /// Run a single-row boolean query bound to one text parameter.
    /// No row reads as `false`.
    fn fetch_bool(&self, sql: &str, bind: &str) -> impl Future<Output = DbResult<bool>> + Send;

    /// Run a query bound to one text parameter and decode the first column of
    /// every row. Row-level failures are returned per row so callers can skip
    /// them; only a failure to run the query at all is an outer error.
    fn fetch_strings(
        &self,
        sql: &str,
        bind: &str,
    ) -> impl Future<Output = DbResult<Vec<DbResult<String>>>> + Send;

    /// Run a parameterless query returning at most one nullable text value.
    fn fetch_optional_string(
        &self,
        sql: &str,
    ) -> impl Future<Output = DbResult<Option<String>>> + Send;

    /// Begin a transaction on one pooled connection.
    fn begin(&self) -> impl Future<Output = DbResult<Self::Transaction>> + Send;
}

/// An open transaction. Dropping it without committing rolls it back.
pub trait DbTransaction: Send {
    /// Prepare and execute a single statement inside the transaction.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send;

    fn commit(self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = DbResult<()>> + Send;
}
