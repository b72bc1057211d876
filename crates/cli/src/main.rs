//! `flowd` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`      — start the engine against Postgres until Ctrl-C.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow JSON file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::{NewWorkflow, PgStore, PoolSettings};
use engine::{EngineBuilder, EngineConfig};

#[derive(Parser)]
#[command(name = "flowd", about = "Single-process workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach triggers for every enabled workflow and process executions.
    Run {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(long, env = "FLOWD_MAX_CONNECTIONS", default_value_t = 10)]
        max_connections: u32,
        /// Seconds to wait for a free database connection.
        #[arg(long, env = "FLOWD_ACQUIRE_TIMEOUT_SECS", default_value_t = 30)]
        acquire_timeout_secs: u64,
        /// Seconds between storage polls for queueing executions.
        #[arg(long, env = "FLOWD_CHECKER_INTERVAL_SECS", default_value_t = 300)]
        checker_interval_secs: u64,
        /// Run migrations before starting.
        #[arg(long)]
        migrate: bool,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            database_url,
            max_connections,
            acquire_timeout_secs,
            checker_interval_secs,
            migrate,
        } => {
            let settings = PoolSettings {
                acquire_timeout: Duration::from_secs(acquire_timeout_secs),
                ..PoolSettings::with_max_connections(max_connections)
            };
            let pool = db::pool::create_pool(&database_url, &settings)
                .await
                .context("failed to connect to database")?;
            if migrate {
                db::pool::run_migrations(&pool).await.context("migration failed")?;
            }

            let mut builder = EngineBuilder::new(Arc::new(PgStore::new(pool)));
            builder
                .config(EngineConfig {
                    checker_interval: Duration::from_secs(checker_interval_secs.max(1)),
                    ..EngineConfig::default()
                })
                .register_builtins()?;
            let engine = builder.build();

            engine.start().await?;
            info!(engine_id = %engine.id(), "flowd running, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutting down");
            engine.shutdown().await;
        }
        Command::Migrate { database_url } => {
            info!("running migrations");
            let pool = db::pool::create_pool(&database_url, &PoolSettings::with_max_connections(2))
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied successfully");
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let workflow: NewWorkflow =
                serde_json::from_str(&content).context("invalid workflow JSON")?;

            match engine::validate_flow(&workflow.nodes) {
                Ok(root) => {
                    println!(
                        "✅ Workflow '{}' is valid. Root node: {}",
                        workflow.key,
                        root.map_or_else(|| "none".to_string(), |id| id.to_string())
                    );
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
