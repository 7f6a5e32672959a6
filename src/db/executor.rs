//! Transactional statement execution.
//!
//! [`TransactionalExecutor`] runs an ordered list of rendered statements in a
//! single transaction: either every statement is applied or none is. Creation
//! and custom revocation scripts go through here.
//!
//! Some PostgreSQL statements are not transactional in every setup (for
//! example role changes replicated by external tooling); the executor cannot
//! hide that and does not try to.

use crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS;
use crate::db::driver::{DbHandle, DbTransaction};
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run one database call under the statement timeout, aborting early when
/// `cancel` fires. Cancellation is checked first, so an already-cancelled
/// token never starts the call.
pub(crate) async fn run_guarded<T, F>(
    operation: &str,
    call: F,
    statement_timeout: Duration,
    cancel: &CancellationToken,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled(operation)),
        result = timeout(statement_timeout, call) => match result {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(operation, statement_timeout.as_secs())),
        },
    }
}

/// Executes statement batches atomically.
#[derive(Debug, Clone)]
pub struct TransactionalExecutor {
    statement_timeout: Duration,
}

impl TransactionalExecutor {
    /// Create a new executor with default settings.
    pub fn new() -> Self {
        Self {
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    /// Create a new executor with a custom per-statement timeout.
    pub fn with_timeout(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    /// Execute all statements in one transaction.
    ///
    /// The first failing statement aborts the batch and rolls the transaction
    /// back; its error is returned wrapped with the statement index. A commit
    /// failure is returned the same way.
    pub async fn execute_all<H: DbHandle>(
        &self,
        handle: &H,
        statements: &[String],
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let mut tx = run_guarded(
            "begin transaction",
            handle.begin(),
            self.statement_timeout,
            cancel,
        )
        .await
        .map_err(|e| DbError::transaction("begin", 0, e))?;

        debug!(statements = statements.len(), "Executing statements in transaction");

        for (index, statement) in statements.iter().enumerate() {
            let result = run_guarded(
                "execute statement",
                tx.execute(statement),
                self.statement_timeout,
                cancel,
            )
            .await;

            if let Err(e) = result {
                warn!(statement_index = index, error = %e, "Statement failed, rolling back");
                self.rollback(tx).await;
                return Err(DbError::transaction("execute", index, e));
            }
        }

        // Commit is not cancellable: once started, its outcome must be known
        match timeout(self.statement_timeout, tx.commit()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DbError::transaction("commit", statements.len(), e)),
            Err(_) => Err(DbError::transaction(
                "commit",
                statements.len(),
                DbError::timeout("commit", self.statement_timeout.as_secs()),
            )),
        }
    }

    async fn rollback<T: DbTransaction>(&self, tx: T) {
        match timeout(self.statement_timeout, tx.rollback()).await {
            Ok(Ok(())) => debug!("Transaction rolled back"),
            // The transaction is discarded either way; the server aborts it
            // when the connection drops
            Ok(Err(e)) => warn!(error = %e, "Rollback failed"),
            Err(_) => warn!("Rollback timed out"),
        }
    }
}

impl Default for TransactionalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_guarded_passes_result_through() {
        let cancel = CancellationToken::new();
        let result = run_guarded("op", async { Ok(7u64) }, Duration::from_secs(1), &cancel).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_guarded_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::sync::atomic::AtomicBool::new(false);
        let result: DbResult<()> = run_guarded(
            "op",
            async {
                started.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
            Duration::from_secs(1),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DbError::Cancelled { .. })));
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_guarded_times_out() {
        let cancel = CancellationToken::new();
        let result: DbResult<()> = run_guarded(
            "slow",
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_secs(5),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DbError::Timeout { elapsed_secs: 5, .. })));
    }
}
