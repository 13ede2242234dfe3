//! Run orchestration: the supervisor process and its file-based signals.
//!
//! A run is three processes: this supervisor, the gateway (this executable
//! re-invoked as `internal-gateway`), and the package manager. They share
//! a run directory under `$TMPDIR`:
//!
//! ```text
//! freshgate-run-<pid>-XXXX/
//! ├── run.toml        ProxyRunConfig, written by the supervisor
//! ├── ca/             ephemeral CA and trust bundle, written by the gateway
//! ├── tool/           emitted tool configuration
//! └── signals/        ready.json, error.json, done.json
//! ```
//!
//! The directory and everything in it is removed when [`run`] returns.

pub mod cleanup;
mod error;
pub mod plan;
pub mod probe;
pub mod process;
pub mod signal;
pub mod supervisor;

pub use error::{EXIT_INTERRUPTED, SignalError, SupervisorError};
pub use plan::{RunPlan, RunRequest};
pub use probe::{HttpPingProbe, ReadinessProbe};
pub use process::{CommandSpec, ProcessHandle, ProcessTable, Role};
pub use signal::{OrchestrationSignal, SignalDir, SignalKind};
pub use supervisor::{RunReport, Supervisor, SupervisorState, Timing};

use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, ProxyRunConfig};
use crate::telemetry::{AuditEvent, audit};
use crate::toolconfig::ToolTarget;

/// Per-attempt timeout of the liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Validate `request`, then supervise one gated run of the package manager.
///
/// Never panics and never returns early without tearing down whatever
/// children were started; the report carries the exit code to use.
pub async fn run(request: &RunRequest, config: &Config, cancel: CancellationToken) -> RunReport {
    let plan = match plan::plan(request) {
        Ok(plan) => plan,
        Err(e) => return RunReport::failed(e),
    };

    cleanup::cleanup_stale_run_dirs();

    let run_dir = match tempfile::Builder::new()
        .prefix(&cleanup::run_dir_prefix(std::process::id()))
        .tempdir()
    {
        Ok(dir) => dir,
        Err(e) => return RunReport::failed(e.into()),
    };
    debug!("Run directory: {:?}", run_dir.path());

    let run = ProxyRunConfig::from_config(config, plan.tool, run_dir.path());
    if let Err(e) = run.write(run_dir.path()) {
        return RunReport::failed(e.into());
    }

    let built = build_supervisor(&plan, &run, run_dir.path(), config, request.verbose, cancel);
    let supervisor = match built {
        Ok(supervisor) => supervisor,
        Err(e) => return RunReport::failed(e),
    };

    announce(&plan, &run);

    let run_id = uuid::Uuid::new_v4().to_string();
    audit().log(AuditEvent::RunStart {
        user: whoami(),
        tool: plan.tool.to_string(),
        pid: std::process::id(),
        run_id,
    });
    let started = Instant::now();

    let report = supervisor.run().await;

    audit().log(AuditEvent::RunEnd {
        tool: plan.tool.to_string(),
        exit_code: report.exit_code,
        duration_sec: started.elapsed().as_secs(),
    });
    info!(
        "Run finished with exit code {} after {:?}",
        report.exit_code,
        started.elapsed()
    );

    drop(run_dir);
    report
}

fn build_supervisor(
    plan: &RunPlan,
    run: &ProxyRunConfig,
    run_dir: &Path,
    config: &Config,
    verbose: u8,
    cancel: CancellationToken,
) -> Result<Supervisor, SupervisorError> {
    let exe = std::env::current_exe()?;
    let probe = HttpPingProbe::new(run.ping_url(), PROBE_TIMEOUT)?;

    Ok(Supervisor::new(
        Timing::from(&config.supervisor),
        &run.signal_dir,
        vec![plan.tool.config_path(&run.config_dir)],
        Box::new(probe),
        plan::gateway_invocation(&exe, run_dir, verbose),
        plan::tool_invocation(plan, run),
        cancel,
    ))
}

/// Tell the operator what is about to happen, on stderr.
fn announce(plan: &RunPlan, run: &ProxyRunConfig) {
    eprintln!(
        "freshgate: running {} behind {} (minimum package age {} days)",
        plan.tool,
        run.tool_proxy_url(),
        run.min_age_days
    );
    eprintln!(
        "freshgate: tool configuration: {}",
        plan.tool.config_path(&run.config_dir).display()
    );
    if plan.tool == ToolTarget::YarnClassic {
        eprintln!(
            "freshgate: warning: yarn 1.x talks to the gateway over plain HTTP with strict-ssl disabled"
        );
    }
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
