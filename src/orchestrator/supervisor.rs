//! The supervisor state machine.
//!
//! ```text
//! Init ─▶ AwaitingConfig ─▶ AwaitingReady ─▶ Running ─┬▶ Blocked ───────┐
//!                                                     ├▶ ToolFailed ────┼▶ Teardown ─▶ Done
//!                                                     └▶ GatewayFailed ─┘
//! ```
//!
//! Every wait is a fixed-interval poll with a deadline. The tool is spawned
//! only after the gateway has answered its liveness probe. While running,
//! each tick checks, in order: gateway liveness, the `Error` signal, tool
//! exit. Any failure before `Running` skips straight to teardown.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::SupervisorError;
use super::probe::ReadinessProbe;
use super::process::{CommandSpec, ProcessHandle, ProcessTable, Role};
use super::signal::{SignalDir, SignalKind};
use crate::config::SupervisorConfig;
use crate::telemetry::{AuditEvent, audit};

/// Supervisor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Provisioning the signal directory.
    Init,
    /// Waiting for the gateway to emit tool configuration.
    AwaitingConfig,
    /// Waiting for the gateway's liveness probe.
    AwaitingReady,
    /// Tool running behind the gateway.
    Running,
    /// The gateway reported a block or fatal error.
    Blocked,
    /// The tool exited non-zero.
    ToolFailed,
    /// The gateway process died.
    GatewayFailed,
    /// Stopping whatever is still alive.
    Teardown,
    /// Finished.
    Done,
}

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Interval between checks.
    pub poll_interval: Duration,
    /// Deadline for each of the config and readiness waits.
    pub wait_timeout: Duration,
    /// Time children get to exit after SIGTERM.
    pub grace_period: Duration,
}

impl From<&SupervisorConfig> for Timing {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
            grace_period: config.grace_period(),
        }
    }
}

/// Outcome of a supervised run.
#[derive(Debug)]
pub struct RunReport {
    /// Process exit code to report.
    pub exit_code: i32,
    /// Why the run failed, if it was not simply the tool's own exit code.
    pub error: Option<SupervisorError>,
    /// Last state before `Done` that decided the outcome.
    pub outcome: SupervisorState,
}

impl RunReport {
    /// Report for a run that failed with `error`.
    pub fn failed(error: SupervisorError) -> Self {
        Self {
            exit_code: error.exit_code(),
            error: Some(error),
            outcome: SupervisorState::Done,
        }
    }
}

/// Drives one run from gateway start to teardown.
pub struct Supervisor {
    timing: Timing,
    signal_root: PathBuf,
    config_files: Vec<PathBuf>,
    probe: Box<dyn ReadinessProbe>,
    gateway: CommandSpec,
    tool: CommandSpec,
    cancel: CancellationToken,
    state: SupervisorState,
}

/// How the running phase ended.
enum Outcome {
    Tool(i32),
    Failed(SupervisorState, SupervisorError),
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// `config_files` are the tool configuration paths the gateway is
    /// expected to emit.
    pub fn new(
        timing: Timing,
        signal_root: impl Into<PathBuf>,
        config_files: Vec<PathBuf>,
        probe: Box<dyn ReadinessProbe>,
        gateway: CommandSpec,
        tool: CommandSpec,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            timing,
            signal_root: signal_root.into(),
            config_files,
            probe,
            gateway,
            tool,
            cancel,
            state: SupervisorState::Init,
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("Supervisor: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run to completion. Always tears down both children before returning.
    pub async fn run(mut self) -> RunReport {
        let mut table = ProcessTable::new();
        let outcome = self.drive(&mut table).await;

        self.transition(SupervisorState::Teardown);
        table
            .teardown(self.timing.grace_period, self.timing.poll_interval)
            .await;
        self.transition(SupervisorState::Done);

        match outcome {
            Outcome::Tool(0) => RunReport {
                exit_code: 0,
                error: None,
                outcome: SupervisorState::Running,
            },
            Outcome::Tool(code) => RunReport {
                exit_code: code,
                error: None,
                outcome: SupervisorState::ToolFailed,
            },
            Outcome::Failed(state, error) => {
                error!("{}", error);
                RunReport {
                    exit_code: error.exit_code(),
                    error: Some(error),
                    outcome: state,
                }
            }
        }
    }

    async fn drive(&mut self, table: &mut ProcessTable) -> Outcome {
        let signals = match SignalDir::create(&self.signal_root) {
            Ok(signals) => signals,
            Err(e) => return Outcome::Failed(SupervisorState::Init, e.into()),
        };

        match ProcessHandle::spawn(Role::Gateway, &self.gateway) {
            Ok(handle) => table.gateway = Some(handle),
            Err(e) => return Outcome::Failed(SupervisorState::GatewayFailed, e.into()),
        }

        self.transition(SupervisorState::AwaitingConfig);
        if let Err(failure) = self.await_config(table, &signals).await {
            return failure;
        }

        self.transition(SupervisorState::AwaitingReady);
        if let Err(failure) = self.await_ready(table, &signals).await {
            return failure;
        }

        match ProcessHandle::spawn(Role::Tool, &self.tool) {
            Ok(handle) => table.tool = Some(handle),
            Err(e) => return Outcome::Failed(SupervisorState::ToolFailed, e.into()),
        }

        self.transition(SupervisorState::Running);
        let outcome = self.monitor(table, &signals).await;
        if let Outcome::Failed(state, _) = &outcome {
            self.transition(*state);
        }
        outcome
    }

    /// Checks shared by the pre-tool waits.
    fn check_gateway(&self, table: &mut ProcessTable, signals: &SignalDir) -> Result<(), Outcome> {
        if self.cancel.is_cancelled() {
            return Err(Outcome::Failed(self.state, SupervisorError::Cancelled));
        }
        if let Some(error) = error_signal(signals) {
            return Err(Outcome::Failed(SupervisorState::Blocked, error));
        }
        if let Some(gateway) = table.gateway.as_mut()
            && !gateway.poll()
        {
            return Err(gateway_failed(gateway, signals));
        }
        Ok(())
    }

    async fn await_config(
        &mut self,
        table: &mut ProcessTable,
        signals: &SignalDir,
    ) -> Result<(), Outcome> {
        let deadline = Instant::now() + self.timing.wait_timeout;
        loop {
            self.check_gateway(table, signals)?;

            if signals.exists(SignalKind::Ready) && self.config_files.iter().all(|p| p.exists()) {
                info!("Gateway emitted tool configuration");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Outcome::Failed(
                    SupervisorState::AwaitingConfig,
                    SupervisorError::ConfigWaitTimeout(self.timing.wait_timeout),
                ));
            }
            self.pause().await;
        }
    }

    async fn await_ready(
        &mut self,
        table: &mut ProcessTable,
        signals: &SignalDir,
    ) -> Result<(), Outcome> {
        let deadline = Instant::now() + self.timing.wait_timeout;
        loop {
            self.check_gateway(table, signals)?;

            if self.probe.probe().await {
                info!("Gateway answered liveness probe");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Outcome::Failed(
                    SupervisorState::AwaitingReady,
                    SupervisorError::ProxyReadinessTimeout(self.timing.wait_timeout),
                ));
            }
            self.pause().await;
        }
    }

    async fn monitor(&mut self, table: &mut ProcessTable, signals: &SignalDir) -> Outcome {
        loop {
            if self.cancel.is_cancelled() {
                warn!("Interrupted, stopping the run");
                return Outcome::Failed(SupervisorState::Running, SupervisorError::Cancelled);
            }

            if let Some(gateway) = table.gateway.as_mut()
                && !gateway.poll()
            {
                return gateway_failed(gateway, signals);
            }

            if let Some(error) = error_signal(signals) {
                return Outcome::Failed(SupervisorState::Blocked, error);
            }

            if let Some(tool) = table.tool.as_mut()
                && !tool.poll()
            {
                let code = tool
                    .exit_code
                    .or_else(|| done_signal_code(signals))
                    .unwrap_or(0);
                info!("Tool exited with code {}", code);

                if let Err(e) = signals.raise(SignalKind::Done, code.to_string()) {
                    warn!("Failed to write done signal: {}", e);
                }

                // A block raised while the tool was exiting still wins.
                if let Some(error) = error_signal(signals) {
                    return Outcome::Failed(SupervisorState::Blocked, error);
                }
                return Outcome::Tool(code);
            }

            self.pause().await;
        }
    }

    /// Sleep one poll interval, waking early on cancellation.
    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.timing.poll_interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

/// The error signal as a supervisor error, if one was raised.
fn error_signal(signals: &SignalDir) -> Option<SupervisorError> {
    match signals.read(SignalKind::Error) {
        Ok(Some(signal)) => Some(match signal.package {
            Some(package) => SupervisorError::PolicyBlocked {
                package: package.name,
                version: package.version,
                reason: signal.payload,
            },
            None => SupervisorError::GatewayReported(signal.payload),
        }),
        Ok(None) => None,
        Err(e) => Some(SupervisorError::GatewayReported(format!(
            "unreadable error signal: {e}"
        ))),
    }
}

/// Exit code recorded in a `Done` signal, if any.
fn done_signal_code(signals: &SignalDir) -> Option<i32> {
    signals
        .read(SignalKind::Done)
        .ok()
        .flatten()
        .and_then(|signal| signal.payload.trim().parse().ok())
}

fn gateway_failed(gateway: &ProcessHandle, signals: &SignalDir) -> Outcome {
    audit().log(AuditEvent::GatewayCrash { pid: gateway.pid });

    let status = match gateway.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "unknown status".to_string(),
    };
    let detail = match error_signal(signals) {
        Some(error) => format!("{status}: {error}"),
        None => status,
    };
    Outcome::Failed(
        SupervisorState::GatewayFailed,
        SupervisorError::GatewayCrashed(detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::error::EXIT_INTERRUPTED;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct Always(bool);

    #[async_trait]
    impl ReadinessProbe for Always {
        async fn probe(&self) -> bool {
            self.0
        }
    }

    fn timing() -> Timing {
        Timing {
            poll_interval: Duration::from_millis(20),
            wait_timeout: Duration::from_secs(2),
            grace_period: Duration::from_secs(2),
        }
    }

    fn sh(script: String) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    /// A stand-in gateway that writes the ready signal and idles.
    fn ready_gateway(signal_dir: &std::path::Path) -> CommandSpec {
        sh(format!(
            "printf '%s' '{{\"kind\":\"ready\",\"timestamp\":\"2026-01-01T00:00:00Z\",\"payload\":\"\"}}' > '{}/ready.json'; sleep 30",
            signal_dir.display()
        ))
    }

    #[tokio::test]
    async fn test_tool_exit_code_propagates() {
        let dir = tempdir().unwrap();
        let signal_dir = dir.path().join("signals");

        let report = Supervisor::new(
            timing(),
            &signal_dir,
            vec![],
            Box::new(Always(true)),
            ready_gateway(&signal_dir),
            sh("exit 7".to_string()),
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(report.exit_code, 7);
        assert!(report.error.is_none());
        assert_eq!(report.outcome, SupervisorState::ToolFailed);

        let done = SignalDir::open(&signal_dir)
            .read(SignalKind::Done)
            .unwrap()
            .unwrap();
        assert_eq!(done.payload, "7");
    }

    #[tokio::test]
    async fn test_config_wait_times_out() {
        let dir = tempdir().unwrap();
        let signal_dir = dir.path().join("signals");
        let marker = dir.path().join("tool-ran");

        let report = Supervisor::new(
            timing(),
            &signal_dir,
            vec![dir.path().join("never.npmrc")],
            Box::new(Always(true)),
            ready_gateway(&signal_dir),
            sh(format!("touch '{}'", marker.display())),
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(report.exit_code, 1);
        assert!(matches!(report.error, Some(SupervisorError::ConfigWaitTimeout(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_gateway_crash_before_ready() {
        let dir = tempdir().unwrap();
        let signal_dir = dir.path().join("signals");

        let report = Supervisor::new(
            timing(),
            &signal_dir,
            vec![],
            Box::new(Always(true)),
            sh("exit 3".to_string()),
            sh("exit 0".to_string()),
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(report.exit_code, 1);
        assert_eq!(report.outcome, SupervisorState::GatewayFailed);
        assert!(
            matches!(report.error, Some(SupervisorError::GatewayCrashed(ref s)) if s.contains("exit code 3"))
        );
    }

    #[tokio::test]
    async fn test_gateway_crash_while_running() {
        let dir = tempdir().unwrap();
        let signal_dir = dir.path().join("signals");
        let gateway = sh(format!(
            "printf '%s' '{{\"kind\":\"ready\",\"timestamp\":\"2026-01-01T00:00:00Z\",\"payload\":\"\"}}' > '{}/ready.json'; sleep 0.5; exit 1",
            signal_dir.display()
        ));

        let report = Supervisor::new(
            timing(),
            &signal_dir,
            vec![],
            Box::new(Always(true)),
            gateway,
            sh("sleep 30".to_string()),
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(report.exit_code, 1);
        assert_eq!(report.outcome, SupervisorState::GatewayFailed);
    }

    #[tokio::test]
    async fn test_cancellation_tears_down() {
        let dir = tempdir().unwrap();
        let signal_dir = dir.path().join("signals");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = Supervisor::new(
            timing(),
            &signal_dir,
            vec![],
            Box::new(Always(true)),
            ready_gateway(&signal_dir),
            sh("sleep 30".to_string()),
            cancel,
        )
        .run()
        .await;

        assert_eq!(report.exit_code, EXIT_INTERRUPTED);
        assert!(matches!(report.error, Some(SupervisorError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
