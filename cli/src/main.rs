use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskpilot_core::Collaborators;
use deskpilot_core::Config;
use deskpilot_core::HttpPlanner;
use deskpilot_core::NoopAdapter;
use deskpilot_core::Orchestrator;
use deskpilot_core::PlannerTransport;

/// Desktop automation orchestrator.
///
/// Runs as a service processing queued requests, or executes a single
/// automation script and exits.
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Cli {
    /// Configuration file path (JSON).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Execute an automation script from the scripts root, then exit.
    #[arg(long, value_name = "PATH")]
    script: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    let planner = config
        .planner_endpoint
        .clone()
        .map(|endpoint| Arc::new(HttpPlanner::new(endpoint)) as Arc<dyn PlannerTransport>);

    let orchestrator = Orchestrator::spawn(
        config,
        Collaborators {
            adapter: Arc::new(NoopAdapter),
            planner,
            parser: None,
            ui: None,
        },
    );

    match cli.script {
        Some(script) => {
            let result = orchestrator.execute_script_file(&script).await;
            orchestrator.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                anyhow::bail!(
                    "script failed: {}",
                    result.error_message.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        None => {
            info!("orchestrator running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}
