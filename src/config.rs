//! Configuration handling for the credential engine.
//!
//! This module provides pool and timeout defaults for the library plus the
//! CLI/environment configuration of the operator binary.

use crate::models::{ConnectionConfig, ConnectionConfigError};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default credential lifetime when neither an expiration nor a TTL is given.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Configuration for the credential engine CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg-credential-engine",
    about = "Create, renew and revoke short-lived PostgreSQL credentials",
    version,
    author
)]
pub struct Config {
    /// PostgreSQL connection string (URL or key=value form).
    #[arg(long = "database-url", value_name = "DSN", env = "PGCRED_DATABASE_URL")]
    pub database_url: String,

    /// Maximum open connections (0 = driver default)
    #[arg(long, default_value_t = 0, env = "PGCRED_MAX_OPEN_CONNECTIONS")]
    pub max_open_connections: u32,

    /// Maximum idle connections kept warm
    #[arg(long, default_value_t = 0, env = "PGCRED_MAX_IDLE_CONNECTIONS")]
    pub max_idle_connections: u32,

    /// Per-statement timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        env = "PGCRED_STATEMENT_TIMEOUT"
    )]
    pub statement_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PGCRED_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "PGCRED_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Lifecycle operation to run.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create a role from a creation script
    Create(CreateArgs),
    /// Extend the validity of an existing role
    Renew(RenewArgs),
    /// Revoke a role, with a custom script or the default cascade
    Revoke(RevokeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub username: String,

    /// Password for the new role; generated when omitted
    #[arg(long, env = "PGCRED_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(flatten)]
    pub validity: ValidityArgs,

    /// Creation statements using {{name}}, {{password}} and {{expiration}}
    #[arg(long, env = "PGCRED_CREATION_STATEMENTS")]
    pub script: String,
}

#[derive(Debug, Clone, Args)]
pub struct RenewArgs {
    #[arg(long)]
    pub username: String,

    #[command(flatten)]
    pub validity: ValidityArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RevokeArgs {
    #[arg(long)]
    pub username: String,

    /// Revocation statements using {{name}}; the default cascade runs when omitted
    #[arg(long, env = "PGCRED_REVOCATION_STATEMENTS")]
    pub script: Option<String>,
}

/// Either an absolute expiration or a TTL relative to now.
#[derive(Debug, Clone, Args)]
pub struct ValidityArgs {
    /// Absolute expiration as accepted by VALID UNTIL
    #[arg(long, conflicts_with = "ttl_secs")]
    pub expiration: Option<String>,

    /// Lifetime in seconds from now
    #[arg(long)]
    pub ttl_secs: Option<u64>,
}

impl ValidityArgs {
    /// Resolve to the expiration string, computing it from the TTL if needed.
    pub fn resolve(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        match &self.expiration {
            Some(expiration) => expiration.clone(),
            None => {
                let ttl = self.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
                let ttl = i64::try_from(ttl)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .unwrap_or(chrono::Duration::MAX);
                crate::models::expiration_after(now, ttl)
            }
        }
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the connection configuration snapshot.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConnectionConfigError> {
        Ok(ConnectionConfig::new(&self.database_url)?
            .with_pool_limits(self.max_open_connections, self.max_idle_connections))
    }

    /// Get statement timeout as Duration.
    pub fn statement_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.statement_timeout)
    }
}
