//! pg-registry - Main entry point.
//!
//! Inspects the configured PostgreSQL connections and runs database
//! administration through a superuser connection.

use clap::Parser;
use pg_registry::config::{Command, Config, RegistrySettings};
use pg_registry::db::ConnectionRegistry;
use pg_registry::error::RegistryResult;
use pg_registry::state::DatabaseState;
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
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

/// Result of one command, rendered as text or JSON.
struct Output {
    text: String,
    json: serde_json::Value,
    success: bool,
}

impl Output {
    fn ok(text: impl Into<String>, json: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            json,
            success: true,
        }
    }
}

async fn run(state: &DatabaseState, command: &Command) -> RegistryResult<Output> {
    let registry = state.registry();
    let admin = state.admin();

    match command {
        Command::Connections => {
            let summaries = registry.connection_summaries().await;
            let text = if summaries.is_empty() {
                "No connections configured".to_string()
            } else {
                summaries
                    .iter()
                    .map(|s| {
                        format!(
                            "{}{}\t{}",
                            s.name,
                            if s.is_superuser { " (superuser)" } else { "" },
                            s.url
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            Ok(Output::ok(text, json!(summaries)))
        }
        Command::Health { name: Some(name) } => {
            let healthy = registry.health_check(Some(name.as_str())).await;
            Ok(Output {
                text: format!("{}: {}", name, if healthy { "healthy" } else { "unhealthy" }),
                json: json!({ "name": name, "healthy": healthy }),
                success: healthy,
            })
        }
        Command::Health { name: None } => {
            let report = state.check_connections().await;
            let text = report
                .connections
                .iter()
                .map(|c| {
                    format!(
                        "{}: {}",
                        c.name,
                        if c.healthy { "healthy" } else { "unhealthy" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Output {
                text,
                json: json!(report),
                success: report.all_healthy(),
            })
        }
        Command::Databases { connection } => {
            let databases = admin.list_databases(connection.as_deref()).await?;
            Ok(Output::ok(databases.join("\n"), json!(databases)))
        }
        Command::Exists {
            database,
            connection,
        } => {
            let exists = admin
                .database_exists(database, connection.as_deref())
                .await?;
            Ok(Output {
                text: format!(
                    "{}: {}",
                    database,
                    if exists { "exists" } else { "does not exist" }
                ),
                json: json!({ "database": database, "exists": exists }),
                success: exists,
            })
        }
        Command::Create {
            database,
            owner,
            connection,
        } => {
            let created = admin
                .create_database(database, owner.as_deref(), connection.as_deref())
                .await?;
            Ok(Output::ok(
                format!(
                    "{}: {}",
                    database,
                    if created { "created" } else { "already exists" }
                ),
                json!({ "database": database, "created": created }),
            ))
        }
        Command::Drop {
            database,
            force,
            connection,
        } => {
            let dropped = admin
                .drop_database(database, connection.as_deref(), *force)
                .await?;
            Ok(Output::ok(
                format!(
                    "{}: {}",
                    database,
                    if dropped { "dropped" } else { "does not exist" }
                ),
                json!({ "database": database, "dropped": dropped }),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting pg-registry v{}", env!("CARGO_PKG_VERSION"));

    let settings = match RegistrySettings::from_env_file(&config.env_file) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry =
        ConnectionRegistry::new(settings).with_dispose_timeout(config.shutdown_timeout_duration());
    let state = DatabaseState::new(Arc::new(registry));

    let result = run(&state, &config.command).await;

    // Always release pooled connections, even when the command failed
    state.shutdown().await;

    match result {
        Ok(output) => {
            if config.json {
                println!("{}", output.json);
            } else {
                println!("{}", output.text);
            }
            if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            if config.json {
                println!(
                    "{}",
                    json!({ "error": e.to_string(), "suggestion": e.suggestion() })
                );
            } else {
                eprintln!("Error: {}", e);
                if let Some(suggestion) = e.suggestion() {
                    eprintln!("Hint: {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}
