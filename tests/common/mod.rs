//! In-memory recording driver shared by the integration tests.
//!
//! Records every statement attempted, keeps committed/autocommitted
//! statements in `applied`, honors rollback, and lets a test inject open,
//! ping, statement, commit and row failures.

#![allow(dead_code)]

use pg_credential_engine::db::{DbHandle, DbTransaction, Driver};
use pg_credential_engine::models::ConnectionConfig;
use pg_credential_engine::{DbError, DbResult};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockState {
    pub opens: usize,
    pub closes: usize,
    /// Configs passed to `open`, in order.
    pub opened_with: Vec<ConnectionConfig>,
    pub fail_open: bool,
    /// Handle ids whose ping fails.
    pub dead_handles: Vec<usize>,

    /// Every statement executed, in or out of a transaction.
    pub attempted: Vec<String>,
    /// Statements whose effect is visible (autocommitted or committed).
    pub applied: Vec<String>,
    /// Queries issued through the fetch methods.
    pub queries: Vec<String>,
    pub commits: usize,
    pub rollbacks: usize,

    /// Statements containing any of these substrings fail.
    pub failing: Vec<String>,
    pub fail_commit: bool,
    /// Statements containing this substring sleep for the given duration.
    pub slow: Option<(String, Duration)>,

    pub role_exists: bool,
    pub fail_exists_check: bool,
    /// Discovery rows; `Err` entries simulate unreadable rows.
    pub schemas: Vec<Result<String, String>>,
    pub fail_discovery: bool,
    pub database: Option<String>,
    pub fail_database: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with<F: FnOnce(&mut MockState)>(self, f: F) -> Self {
        f(&mut self.state());
        self
    }
}

fn injected(statement: &str) -> DbError {
    DbError::database(
        format!("injected failure for `{}`", statement),
        Some("42501".to_string()),
        "test double",
    )
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    async fn open(&self, config: &ConnectionConfig) -> DbResult<MockHandle> {
        let mut state = self.state();
        if state.fail_open {
            return Err(DbError::connection("connection refused", "start the database"));
        }
        state.opens += 1;
        state.opened_with.push(config.clone());
        Ok(MockHandle {
            id: state.opens,
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub struct MockHandle {
    pub id: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Record an attempt and decide whether it fails or is slow.
    fn attempt(&self, sql: &str) -> (bool, Option<Duration>) {
        let mut state = self.state();
        state.attempted.push(sql.to_string());
        let fails = state.failing.iter().any(|f| sql.contains(f.as_str()));
        let delay = state
            .slow
            .as_ref()
            .filter(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);
        (fails, delay)
    }
}

impl DbHandle for MockHandle {
    type Transaction = MockTx;

    async fn ping(&self) -> DbResult<()> {
        if self.state().dead_handles.contains(&self.id) {
            return Err(DbError::connection("server closed the connection", "reconnect"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.state().closes += 1;
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        let (fails, delay) = self.attempt(sql);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(injected(sql));
        }
        self.state().applied.push(sql.to_string());
        Ok(0)
    }

    async fn fetch_bool(&self, sql: &str, _bind: &str) -> DbResult<bool> {
        let mut state = self.state();
        state.queries.push(sql.to_string());
        if state.fail_exists_check {
            return Err(injected(sql));
        }
        Ok(state.role_exists)
    }

    async fn fetch_strings(&self, sql: &str, _bind: &str) -> DbResult<Vec<DbResult<String>>> {
        let mut state = self.state();
        state.queries.push(sql.to_string());
        if state.fail_discovery {
            return Err(injected(sql));
        }
        Ok(state
            .schemas
            .iter()
            .map(|row| row.clone().map_err(DbError::internal))
            .collect())
    }

    async fn fetch_optional_string(&self, sql: &str) -> DbResult<Option<String>> {
        let mut state = self.state();
        state.queries.push(sql.to_string());
        if state.fail_database {
            return Err(injected(sql));
        }
        Ok(state.database.clone())
    }

    async fn begin(&self) -> DbResult<MockTx> {
        Ok(MockTx {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MockTx {
    state: Arc<Mutex<MockState>>,
    pending: Vec<String>,
}

impl DbTransaction for MockTx {
    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let (fails, delay) = {
            let mut state = self.state.lock().unwrap();
            state.attempted.push(sql.to_string());
            let fails = state.failing.iter().any(|f| sql.contains(f.as_str()));
            let delay = state
                .slow
                .as_ref()
                .filter(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, delay)| *delay);
            (fails, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(injected(sql));
        }
        self.pending.push(sql.to_string());
        Ok(0)
    }

    async fn commit(self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit {
            state.rollbacks += 1;
            return Err(DbError::database(
                "could not serialize access",
                Some("40001".to_string()),
                "retry",
            ));
        }
        state.commits += 1;
        state.applied.extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}
