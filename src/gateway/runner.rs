//! Entry point of the gateway process (`freshgate internal-gateway`).
//!
//! Startup order matters to the supervisor:
//!
//! 1. Load `run.toml` from the run directory
//! 2. Issue the ephemeral CA and write the PEM files and trust bundle
//! 3. Bind the listen address
//! 4. Emit the tool configuration, then write the `Ready` signal
//! 5. Serve until SIGINT/SIGTERM
//!
//! Any failure along the way is written as an `Error` signal before the
//! process exits, so the supervisor reports the cause instead of a bare
//! crash.

use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind as UnixSignal, signal};
use tokio::sync::watch;
use tracing::{error, info};

use super::error::GatewayError;
use super::hook::FreshnessHook;
use super::server::{GatewayContext, GatewayServer, bind};
use super::tls::CertificateCache;
use crate::ca::{CA_COMMON_NAME, EphemeralCa, find_host_ca_bundle};
use crate::config::ProxyRunConfig;
use crate::orchestrator::{SignalDir, SignalKind};
use crate::policy::FreshnessPolicy;
use crate::toolconfig;

/// Run the gateway for the run directory `run_dir`.
pub async fn run_gateway(run_dir: &Path) -> Result<(), GatewayError> {
    let run = ProxyRunConfig::load(run_dir)?;
    let signals = SignalDir::create(&run.signal_dir)?;

    let result = serve(&run, &signals).await;
    if let Err(ref e) = result {
        error!("Gateway failed: {}", e);
        if let Err(signal_err) = signals.raise(SignalKind::Error, format!("Gateway failed: {e}")) {
            error!("Failed to write error signal: {}", signal_err);
        }
    }
    result
}

async fn serve(run: &ProxyRunConfig, signals: &SignalDir) -> Result<(), GatewayError> {
    let ca = Arc::new(EphemeralCa::issue(CA_COMMON_NAME)?);
    ca.write_pem(&run.ca_cert_path, &run.ca_key_path)?;
    ca.create_combined_bundle(find_host_ca_bundle(), &run.ca_bundle_path)?;

    let policy = Arc::new(FreshnessPolicy::from_run_config(run)?);
    let hook = Arc::new(FreshnessHook::new(
        policy.clone(),
        signals.clone(),
        run.on_lookup_failure,
    ));
    let context = GatewayContext::new(
        policy,
        hook,
        Arc::new(CertificateCache::new(ca)),
        run.listen_host.clone(),
    );

    let listener = bind(&run.listen_host, run.listen_port).await?;

    let written = toolconfig::write_config(run.tool, &run.config_dir, run)?;
    let listing = written
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    signals.raise(SignalKind::Ready, listing)?;

    info!(
        "Gateway ready on {} (minimum package age {} days)",
        run.authority(),
        run.min_age_days
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_termination().await {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    GatewayServer::new(context, shutdown_rx).run(listener).await
}

/// Resolve on the first SIGINT or SIGTERM.
async fn wait_for_termination() -> std::io::Result<()> {
    let mut sigterm = signal(UnixSignal::terminate())?;
    let mut sigint = signal(UnixSignal::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
