//! Credential lifecycle operations.
//!
//! [`PostgresBackend`] is what a secret-issuing caller talks to. Every
//! operation acquires a shared connection guard for its whole duration, so a
//! concurrent [`PostgresBackend::reset`] or [`PostgresBackend::close`] waits
//! until in-flight operations are done instead of closing their connection.

use crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS;
use crate::db::driver::{DbHandle, Driver};
use crate::db::executor::{TransactionalExecutor, run_guarded};
use crate::db::pool::ConnectionManager;
use crate::db::postgres::PgDriver;
use crate::db::revocation::{RevocationCascade, RevocationReport};
use crate::db::template::{StatementTemplater, quote_identifier, quote_literal};
use crate::error::DbResult;
use crate::models::{ConnectionConfig, Credential};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub const BACKEND_TYPE: &str = "postgres";

/// Creates, renews and revokes database roles.
#[derive(Debug)]
pub struct PostgresBackend<D: Driver = PgDriver> {
    connections: ConnectionManager<D>,
    executor: TransactionalExecutor,
    cascade: RevocationCascade,
    statement_timeout: Duration,
}

impl PostgresBackend<PgDriver> {
    /// Backend over the sqlx PostgreSQL driver.
    pub fn postgres(config: ConnectionConfig) -> Self {
        Self::new(PgDriver::new(), config)
    }
}

impl<D: Driver> PostgresBackend<D> {
    pub fn new(driver: D, config: ConnectionConfig) -> Self {
        let statement_timeout = Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS);
        Self {
            connections: ConnectionManager::new(driver, config),
            executor: TransactionalExecutor::with_timeout(statement_timeout),
            cascade: RevocationCascade::with_timeout(statement_timeout),
            statement_timeout,
        }
    }

    /// Override the per-statement timeout.
    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.executor = TransactionalExecutor::with_timeout(statement_timeout);
        self.cascade = RevocationCascade::with_timeout(statement_timeout);
        self.statement_timeout = statement_timeout;
        self
    }

    pub fn backend_type(&self) -> &'static str {
        BACKEND_TYPE
    }

    pub fn connections(&self) -> &ConnectionManager<D> {
        &self.connections
    }

    /// Replace the connection configuration and reconnect.
    pub async fn reset(&self, config: ConnectionConfig) -> DbResult<()> {
        self.connections.reset(config).await.map(|_| ())
    }

    /// Close the shared connection. The next operation reconnects.
    pub async fn close(&self) {
        self.connections.close().await;
        info!("Credential backend connection closed");
    }

    /// Create a role by running the creation script in one transaction.
    ///
    /// The script is rendered before connecting, so template errors never
    /// touch the database.
    #[instrument(skip_all, fields(username = %credential.username))]
    pub async fn create_user(
        &self,
        creation_script: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let statements = StatementTemplater::for_creation(credential).render(creation_script)?;

        let conn = self.connections.connection().await?;
        self.executor.execute_all(&*conn, &statements, cancel).await?;

        info!(statements = statements.len(), "Role created");
        Ok(())
    }

    /// Extend the validity window of a role.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn renew_user(
        &self,
        username: &str,
        expiration: &str,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let statement = renew_statement(username, expiration);

        let conn = self.connections.connection().await?;
        run_guarded(
            "renew role",
            conn.execute(&statement),
            self.statement_timeout,
            cancel,
        )
        .await?;

        debug!(expiration = %expiration, "Role renewed");
        Ok(())
    }

    /// Revoke a role with an operator-supplied script, atomically.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn custom_revoke_user(
        &self,
        username: &str,
        revocation_script: &str,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let statements = StatementTemplater::for_revocation(username).render(revocation_script)?;

        let conn = self.connections.connection().await?;
        self.executor.execute_all(&*conn, &statements, cancel).await?;

        info!(statements = statements.len(), "Role revoked with custom statements");
        Ok(())
    }

    /// Revoke a role with the default cascade and drop it when fully stripped.
    ///
    /// A missing role is a success. If any privilege could not be confirmed
    /// as revoked the role is kept and `DbError::RevocationIncomplete` lists
    /// every failure; the call is safe to retry.
    pub async fn default_revoke_user(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        self.default_revoke_user_with_report(username, cancel)
            .await?
            .into_result()
    }

    /// Like [`default_revoke_user`](Self::default_revoke_user) but returns the
    /// per-statement report instead of collapsing it into an error.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn default_revoke_user_with_report(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> DbResult<RevocationReport> {
        let conn = self.connections.connection().await?;
        self.cascade.run(&*conn, username, cancel).await
    }
}

/// `ALTER ROLE ... VALID UNTIL ...` for a renewal.
pub fn renew_statement(username: &str, expiration: &str) -> String {
    format!(
        "ALTER ROLE {} VALID UNTIL {};",
        quote_identifier(username),
        quote_literal(expiration)
    )
}
