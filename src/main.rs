//! PostgreSQL Credential Engine - operator CLI.
//!
//! Runs a single lifecycle operation (create, renew or revoke) against the
//! configured database. Ctrl-C cancels the running operation.

use chrono::Utc;
use pg_credential_engine::PostgresBackend;
use pg_credential_engine::config::{Command, Config};
use pg_credential_engine::models::Credential;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    init_tracing(&config);

    info!(
        "Starting pg-credential-engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let backend = PostgresBackend::postgres(config.connection_config()?)
        .with_statement_timeout(config.statement_timeout_duration());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling operation");
            on_signal.cancel();
        }
    });

    let result = match &config.command {
        Command::Create(args) => {
            let password = args
                .password
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let credential = Credential::new(
                args.username.clone(),
                password,
                args.validity.resolve(Utc::now()),
            );
            let result = backend
                .create_user(&args.script, &credential, &cancel)
                .await;
            if result.is_ok() {
                println!("{}", serde_json::json!({
                    "username": credential.username,
                    "password": credential.password,
                    "expiration": credential.expiration,
                }));
            }
            result
        }
        Command::Renew(args) => {
            let expiration = args.validity.resolve(Utc::now());
            let result = backend.renew_user(&args.username, &expiration, &cancel).await;
            if result.is_ok() {
                println!("{}", serde_json::json!({
                    "username": args.username,
                    "expiration": expiration,
                }));
            }
            result
        }
        Command::Revoke(args) => match &args.script {
            Some(script) => backend.custom_revoke_user(&args.username, script, &cancel).await,
            None => backend.default_revoke_user(&args.username, &cancel).await,
        },
    };

    backend.close().await;

    if let Err(e) = result {
        error!(error = %e, retryable = e.is_retryable(), "Operation failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    info!("Operation complete");
    Ok(())
}
