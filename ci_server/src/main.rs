//! Tubereng CI Server: runs the repository's CI workflow for GitHub events.
//!
//! Receives push and pull request webhooks, queues builds for the events the
//! workflow triggers on, runs them with the core runner and reports each job
//! back to GitHub as a commit status.

mod config;
mod dashboard;
mod metrics;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::path::PathBuf;

use ci_core::{default_workflow, Workflow};
use clap::Parser;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Parser)]
#[command(name = "ci-server", about = "Tubereng CI webhook server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// Workflow for trigger matching and repositories without their own
    #[arg(long, env = "CI_WORKFLOW")]
    workflow: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting Tubereng CI Server...");

    let workflow = match &cli.workflow {
        Some(path) => Workflow::load(path)?,
        None => default_workflow(),
    };
    workflow.validate()?;
    tracing::info!(
        workflow = %workflow.name,
        jobs = workflow.jobs.len(),
        "Workflow loaded"
    );

    let ci_config = config::CiConfig::from_env();
    let ci_state = routes::CiRouterState::new(ci_config, workflow);

    // Background build executor
    tokio::spawn(services::executor::run_executor(ci_state.clone()));

    // Initialize metrics
    metrics::init_metrics();

    let app = routes::ci_router(ci_state)
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Tubereng CI Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
