//! Command handling for freshgate.
//!
//! Bridges parsed CLI arguments to the gateway process and the supervisor,
//! each on its own tokio runtime.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::gateway;
use crate::orchestrator::{self, RunReport, RunRequest};

/// Handle subcommands (internal gateway).
pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::InternalGateway { run_dir } => run_gateway_subprocess(&run_dir),
    }
}

/// Run the gateway as a subprocess of the supervisor.
fn run_gateway_subprocess(run_dir: &Path) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        gateway::run_gateway(run_dir)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    })
}

/// Build the supervisor request from the command line.
pub fn run_request(cli: &Cli) -> Result<RunRequest> {
    let tool = cli
        .tool
        .clone()
        .context("No package manager given (expected 'npm' or 'yarn')")?;

    Ok(RunRequest {
        tool,
        tool_args: cli.effective_tool_args(),
        project_dir: cli.project_dir.clone(),
        allow_plain_http: cli.allow_plain_http,
        yarn_major: cli.yarn_major,
        verbose: cli.verbose,
    })
}

/// Supervise one run until it finishes or SIGINT/SIGTERM arrives.
pub fn run_supervised(request: &RunRequest, config: &Config) -> Result<RunReport> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            match wait_for_interrupt().await {
                Ok(()) => trigger.cancel(),
                Err(e) => error!("Failed to install signal handlers: {}", e),
            }
        });

        Ok(orchestrator::run(request, config, cancel).await)
    })
}

/// Resolve on the first SIGINT or SIGTERM.
async fn wait_for_interrupt() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, tearing down"),
        _ = sigint.recv() => info!("Received SIGINT, tearing down"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_run_request_requires_tool() {
        let cli = Cli::parse_from(["freshgate"]);
        assert!(run_request(&cli).is_err());
    }

    #[test]
    fn test_run_request_from_flags() {
        let cli = Cli::parse_from([
            "freshgate",
            "-C",
            "/work/app",
            "--allow-plain-http",
            "--yarn-major",
            "1",
            "-v",
            "yarn",
        ]);

        let request = run_request(&cli).unwrap();

        assert_eq!(request.tool, "yarn");
        assert_eq!(request.tool_args, vec!["install"]);
        assert_eq!(request.project_dir, PathBuf::from("/work/app"));
        assert!(request.allow_plain_http);
        assert_eq!(request.yarn_major, Some(1));
        assert_eq!(request.verbose, 1);
    }
}
