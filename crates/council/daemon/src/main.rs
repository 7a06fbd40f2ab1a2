//! Council Daemon - collaboration session engine host
//!
//! `councild` wires the engine to its configured narrative backend, runs
//! the lifecycle sweeps, and either processes an events file or serves
//! until interrupted.

use clap::Parser;
use council_daemon::{build_narrator, ingest_events, DaemonConfig, DaemonError, DaemonResult};
use council_engine::{
    spawn_subscriber, InMemorySemanticIndex, ParticipantDirectory, SessionOrchestrator,
    TracingAnalyticsSink,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Council Daemon CLI
#[derive(Parser)]
#[command(name = "councild")]
#[command(about = "Council Daemon - collaboration sessions for city events", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COUNCIL_CONFIG")]
    config: Option<String>,

    /// JSON-lines file of events to process; `-` reads stdin
    #[arg(short, long)]
    events: Option<String>,

    /// Keep running after the events file is processed
    #[arg(long)]
    serve: bool,

    /// Log level (overrides the config file)
    #[arg(long, env = "COUNCIL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "COUNCIL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = DaemonConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let directory = Arc::new(ParticipantDirectory::with_default_experts());
    for profile in &config.participants {
        directory.register(profile.clone());
    }

    let narrator = build_narrator(&config.narrative)?;
    let engine = SessionOrchestrator::new(
        config.engine.clone(),
        narrator,
        Arc::new(InMemorySemanticIndex::default()),
        directory.clone(),
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        narrative = ?config.narrative.kind,
        participants = directory.len(),
        "Council daemon starting"
    );

    let analytics = spawn_subscriber(&engine.bus(), Arc::new(TracingAnalyticsSink));
    let sweeper = Arc::new(engine.sweeper()).spawn();

    let result = run(&cli, &engine).await;

    tracing::info!("Council daemon shutting down");
    sweeper.shutdown().await;
    analytics.abort();
    result
}

async fn run(cli: &Cli, engine: &SessionOrchestrator) -> DaemonResult<()> {
    if let Some(path) = cli.events.as_deref() {
        let views = if path == "-" {
            ingest_events(engine, BufReader::new(tokio::io::stdin())).await?
        } else {
            let file = tokio::fs::File::open(path).await?;
            ingest_events(engine, BufReader::new(file)).await?
        };

        let output = serde_json::to_string_pretty(&views)
            .map_err(|e| DaemonError::Config(format!("failed to render sessions: {}", e)))?;
        println!("{}", output);

        if !cli.serve {
            return Ok(());
        }
    }

    shutdown_signal().await;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
