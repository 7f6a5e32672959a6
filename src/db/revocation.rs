//! Default revocation cascade.
//!
//! Used when no custom revocation script is configured. Privileges are
//! stripped before the role is dropped:
//!
//! 1. Check that the role exists; a missing role is a successful no-op.
//! 2. Discover every schema the role holds column grants in.
//! 3. Build a [`RevocationPlan`]: per-schema table and usage revokes, the
//!    `public` schema revokes, and `REVOKE CONNECT` on the current database.
//! 4. Execute every statement on its own, continuing past failures so as
//!    much access as possible is removed.
//! 5. Drop the role only if discovery and every statement succeeded.
//!
//! Nothing here runs in a transaction: a failure in one revoke must not undo
//! the others.

use crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS;
use crate::db::driver::DbHandle;
use crate::db::executor::run_guarded;
use crate::db::template::quote_identifier;
use crate::error::{DbError, DbResult, RevocationFailure};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ROLE_EXISTS_QUERY: &str =
    "SELECT exists (SELECT rolname FROM pg_roles WHERE rolname=$1);";
pub const GRANTED_SCHEMAS_QUERY: &str =
    "SELECT DISTINCT table_schema FROM information_schema.role_column_grants WHERE grantee=$1;";
pub const CURRENT_DATABASE_QUERY: &str = "SELECT current_database();";

/// Ordered revocation statements for one role. Rebuilt on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationPlan {
    role: String,
    statements: Vec<String>,
}

impl RevocationPlan {
    /// Build the plan from the discovered schemas and the current database.
    pub fn build(role: &str, schemas: &[String], database: Option<&str>) -> Self {
        let grantee = quote_identifier(role);
        let mut statements = Vec::with_capacity(schemas.len() * 2 + 4);

        for schema in schemas {
            let schema = quote_identifier(schema);
            statements.push(format!(
                "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA {schema} FROM {grantee};"
            ));
            statements.push(format!("REVOKE USAGE ON SCHEMA {schema} FROM {grantee};"));
        }

        statements.push(format!(
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA public FROM {grantee};"
        ));
        statements.push(format!(
            "REVOKE ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public FROM {grantee};"
        ));
        statements.push(format!("REVOKE USAGE ON SCHEMA public FROM {grantee};"));

        if let Some(database) = database {
            statements.push(format!(
                "REVOKE CONNECT ON DATABASE {} FROM {grantee};",
                quote_identifier(database)
            ));
        }

        Self {
            role: role.to_string(),
            statements,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// The final statement, issued only after a fully successful plan.
    pub fn drop_statement(&self) -> String {
        format!("DROP ROLE IF EXISTS {};", quote_identifier(&self.role))
    }
}

/// What happened to one planned statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    Applied,
    Failed(String),
    /// Interrupted in flight (cancelled or timed out); it may or may not
    /// have taken effect.
    Unknown(String),
    /// Never started because the operation was cancelled first.
    Skipped,
}

impl StatementOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    fn describe(&self) -> Option<String> {
        match self {
            Self::Applied => None,
            Self::Failed(error) => Some(error.clone()),
            Self::Unknown(error) => Some(format!("outcome unknown: {}", error)),
            Self::Skipped => Some("skipped: operation cancelled".to_string()),
        }
    }
}

/// Result of one cascade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationReport {
    pub role: String,
    /// False when the role did not exist and nothing was done.
    pub existed: bool,
    pub discovery_failures: Vec<RevocationFailure>,
    pub outcomes: Vec<(String, StatementOutcome)>,
    pub dropped: bool,
}

impl RevocationReport {
    fn missing(role: &str) -> Self {
        Self {
            role: role.to_string(),
            existed: false,
            discovery_failures: Vec::new(),
            outcomes: Vec::new(),
            dropped: false,
        }
    }

    /// True when discovery and every planned statement succeeded.
    pub fn is_complete(&self) -> bool {
        self.discovery_failures.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_applied())
    }

    /// Every discovery failure followed by every non-applied statement, in order.
    pub fn failures(&self) -> Vec<RevocationFailure> {
        let statements = self.outcomes.iter().filter_map(|(statement, outcome)| {
            outcome.describe().map(|error| RevocationFailure {
                statement: statement.clone(),
                error,
            })
        });
        self.discovery_failures
            .iter()
            .cloned()
            .chain(statements)
            .collect()
    }

    /// Collapse the report into the operation result.
    pub fn into_result(self) -> DbResult<()> {
        if !self.existed || self.dropped {
            return Ok(());
        }
        let failures = self.failures();
        Err(DbError::revocation_incomplete(self.role, failures))
    }
}

/// Runs the default revocation procedure against one handle.
#[derive(Debug, Clone)]
pub struct RevocationCascade {
    statement_timeout: Duration,
}

impl RevocationCascade {
    pub fn new() -> Self {
        Self {
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    /// Run the cascade for `role`.
    ///
    /// Returns `Err` only when nothing could be attempted (existence check
    /// failed) or the final drop failed. Partial revocation is reported
    /// through the returned [`RevocationReport`], with `dropped == false`.
    pub async fn run<H: DbHandle>(
        &self,
        handle: &H,
        role: &str,
        cancel: &CancellationToken,
    ) -> DbResult<RevocationReport> {
        let exists = run_guarded(
            "check role exists",
            handle.fetch_bool(ROLE_EXISTS_QUERY, role),
            self.statement_timeout,
            cancel,
        )
        .await?;

        if !exists {
            debug!(role = %role, "Role does not exist, nothing to revoke");
            return Ok(RevocationReport::missing(role));
        }

        let mut discovery_failures = Vec::new();
        let schemas = self
            .discover_schemas(handle, role, cancel, &mut discovery_failures)
            .await;
        let database = self
            .current_database(handle, cancel, &mut discovery_failures)
            .await;

        let plan = RevocationPlan::build(role, &schemas, database.as_deref());
        debug!(
            role = %role,
            schemas = schemas.len(),
            statements = plan.statements().len(),
            "Executing revocation plan"
        );

        let outcomes = self.execute_plan(handle, &plan, cancel).await;

        let mut report = RevocationReport {
            role: role.to_string(),
            existed: true,
            discovery_failures,
            outcomes,
            dropped: false,
        };

        if !report.is_complete() {
            warn!(
                role = %role,
                failures = report.failures().len(),
                "Revocation incomplete, role not dropped"
            );
            return Ok(report);
        }

        let drop_statement = plan.drop_statement();
        run_guarded(
            "drop role",
            handle.execute(&drop_statement),
            self.statement_timeout,
            cancel,
        )
        .await?;

        info!(role = %role, "Role revoked and dropped");
        report.dropped = true;
        Ok(report)
    }

    /// Collect granted schemas; unreadable rows are skipped and recorded.
    async fn discover_schemas<H: DbHandle>(
        &self,
        handle: &H,
        role: &str,
        cancel: &CancellationToken,
        failures: &mut Vec<RevocationFailure>,
    ) -> Vec<String> {
        let rows = run_guarded(
            "discover granted schemas",
            handle.fetch_strings(GRANTED_SCHEMAS_QUERY, role),
            self.statement_timeout,
            cancel,
        )
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(role = %role, error = %e, "Schema discovery failed");
                failures.push(RevocationFailure {
                    statement: GRANTED_SCHEMAS_QUERY.to_string(),
                    error: e.to_string(),
                });
                return Vec::new();
            }
        };

        let mut schemas = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Ok(schema) => schemas.push(schema),
                Err(e) => {
                    warn!(role = %role, error = %e, "Skipping unreadable schema row");
                    failures.push(RevocationFailure {
                        statement: GRANTED_SCHEMAS_QUERY.to_string(),
                        error: format!("row scan failed: {}", e),
                    });
                }
            }
        }
        schemas
    }

    async fn current_database<H: DbHandle>(
        &self,
        handle: &H,
        cancel: &CancellationToken,
        failures: &mut Vec<RevocationFailure>,
    ) -> Option<String> {
        let result = run_guarded(
            "resolve current database",
            handle.fetch_optional_string(CURRENT_DATABASE_QUERY),
            self.statement_timeout,
            cancel,
        )
        .await;

        match result {
            Ok(database) => database,
            Err(e) => {
                warn!(error = %e, "Could not resolve current database");
                failures.push(RevocationFailure {
                    statement: CURRENT_DATABASE_QUERY.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    async fn execute_plan<H: DbHandle>(
        &self,
        handle: &H,
        plan: &RevocationPlan,
        cancel: &CancellationToken,
    ) -> Vec<(String, StatementOutcome)> {
        let mut outcomes = Vec::with_capacity(plan.statements().len());

        for statement in plan.statements() {
            if cancel.is_cancelled() {
                outcomes.push((statement.clone(), StatementOutcome::Skipped));
                continue;
            }

            let outcome = match run_guarded(
                "revoke privileges",
                handle.execute(statement),
                self.statement_timeout,
                cancel,
            )
            .await
            {
                Ok(_) => StatementOutcome::Applied,
                Err(e @ (DbError::Cancelled { .. } | DbError::Timeout { .. })) => {
                    warn!(statement = %statement, error = %e, "Revocation statement interrupted");
                    StatementOutcome::Unknown(e.to_string())
                }
                Err(e) => {
                    warn!(statement = %statement, error = %e, "Revocation statement failed");
                    StatementOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((statement.clone(), outcome));
        }

        outcomes
    }
}

impl Default for RevocationCascade {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_without_schemas_or_database() {
        let plan = RevocationPlan::build("bob", &[], None);
        assert_eq!(
            plan.statements(),
            &[
                "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA public FROM \"bob\";".to_string(),
                "REVOKE ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public FROM \"bob\";"
                    .to_string(),
                "REVOKE USAGE ON SCHEMA public FROM \"bob\";".to_string(),
            ]
        );
    }

    #[test]
    fn test_plan_orders_schema_statements_first() {
        let schemas = vec!["s1".to_string(), "Odd\"Name".to_string()];
        let plan = RevocationPlan::build("v-bob", &schemas, Some("app"));
        let statements = plan.statements();
        assert_eq!(statements.len(), 8);
        assert_eq!(
            statements[0],
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA \"s1\" FROM \"v-bob\";"
        );
        assert_eq!(statements[1], "REVOKE USAGE ON SCHEMA \"s1\" FROM \"v-bob\";");
        assert_eq!(
            statements[3],
            "REVOKE USAGE ON SCHEMA \"Odd\"\"Name\" FROM \"v-bob\";"
        );
        assert_eq!(
            statements[7],
            "REVOKE CONNECT ON DATABASE \"app\" FROM \"v-bob\";"
        );
        assert_eq!(plan.drop_statement(), "DROP ROLE IF EXISTS \"v-bob\";");
    }

    #[test]
    fn test_report_failures_keep_every_entry() {
        let report = RevocationReport {
            role: "bob".to_string(),
            existed: true,
            discovery_failures: vec![RevocationFailure {
                statement: GRANTED_SCHEMAS_QUERY.to_string(),
                error: "row scan failed: bad utf8".to_string(),
            }],
            outcomes: vec![
                ("a".to_string(), StatementOutcome::Failed("denied".to_string())),
                ("b".to_string(), StatementOutcome::Applied),
                ("c".to_string(), StatementOutcome::Unknown("cancelled".to_string())),
                ("d".to_string(), StatementOutcome::Skipped),
            ],
            dropped: false,
        };

        assert!(!report.is_complete());
        let failures = report.failures();
        assert_eq!(failures.len(), 4);
        assert_eq!(failures[1].statement, "a");
        assert!(failures[2].error.starts_with("outcome unknown"));
        assert!(failures[3].error.starts_with("skipped"));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, DbError::RevocationIncomplete { ref failures, .. } if failures.len() == 4));
    }

    #[test]
    fn test_missing_role_report_is_ok() {
        let report = RevocationReport::missing("ghost");
        assert!(report.is_complete());
        assert!(report.into_result().is_ok());
    }
}
