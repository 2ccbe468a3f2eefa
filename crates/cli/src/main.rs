//! Railgun flow operator CLI
//!
//! Usage:
//!   railgun-flow <init|address|balances|shield|shield-data|transfer|unshield|pois>
//!
//! Example:
//!   RAILGUN_TEST_RPC=https://rpc.sepolia.org railgun-flow shield

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use railgun_flow::{bridge_engine, execute, Cli, OperatorConfig};
use railgun_orchestrator::{run_until_interrupted, EngineLifecycle, RunOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,railgun_orchestrator=debug,railgun_flow=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = OperatorConfig::from_env().context("Failed to load operator configuration")?;

    tracing::info!("Running {} on chain {}", cli.command.name(), config.network_id);
    tracing::info!("  RPC: {}", config.rpc_url);
    tracing::info!("  Engine: {}", config.engine_url);
    tracing::info!("  Database: {}", config.db_path.display());

    let lifecycle = Arc::new(EngineLifecycle::new(Arc::new(bridge_engine(&config))));
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let outcome = run_until_interrupted(
        lifecycle.clone(),
        execute(cli.command, config, lifecycle),
        interrupt,
    )
    .await
    .with_context(|| format!("{} failed", cli.command.name()))?;

    match outcome {
        RunOutcome::Completed(()) => tracing::info!("{} complete", cli.command.name()),
        RunOutcome::Interrupted => tracing::warn!("{} interrupted, engine stopped", cli.command.name()),
    }
    Ok(())
}
