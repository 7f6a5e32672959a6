//! Database abstraction layer.
//!
//! This module provides the credential lifecycle machinery:
//! - Driver capability traits and the sqlx PostgreSQL driver
//! - Connection management with lazy (re)connect
//! - Statement templating and identifier quoting
//! - Transactional execution of statement batches
//! - The default best-effort revocation cascade

pub mod driver;
pub mod executor;
pub mod pool;
pub mod postgres;
pub mod revocation;
pub mod template;

pub use driver::{DbHandle, DbTransaction, Driver};
pub use executor::TransactionalExecutor;
pub use pool::{ConnectionGuard, ConnectionManager};
pub use postgres::{PgDriver, PgHandle, PgTx};
pub use revocation::{RevocationCascade, RevocationPlan, RevocationReport, StatementOutcome};
pub use template::{StatementTemplater, quote_identifier, quote_literal, split_statements};
