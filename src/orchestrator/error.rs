//! Error types for the orchestration supervisor.
//!
//! [`SupervisorError`] is the run-level taxonomy: every variant maps to the
//! process exit code the supervisor reports. [`SignalError`] covers the
//! signal-file transport shared with the gateway process.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors reading or writing orchestration signal files.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Failed to create the signal directory.
    #[error("Failed to create signal directory {path:?}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a signal file.
    #[error("Failed to write signal {path:?}: {source}")]
    Write {
        /// Signal file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a signal file.
    #[error("Failed to read signal {path:?}: {source}")]
    Read {
        /// Signal file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A signal file did not contain a valid signal document.
    #[error("Malformed signal {path:?}: {source}")]
    Malformed {
        /// Signal file path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize a signal.
    #[error("Failed to serialize signal: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reasons a supervised run ends unsuccessfully.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The gateway did not emit the tool configuration in time.
    #[error("Timed out after {0:?} waiting for the gateway to emit tool configuration")]
    ConfigWaitTimeout(Duration),

    /// The gateway never answered its liveness probe.
    #[error("Timed out after {0:?} waiting for the gateway to answer its liveness probe")]
    ProxyReadinessTimeout(Duration),

    /// The gateway process exited while the run was in progress.
    #[error("Gateway process exited unexpectedly ({0})")]
    GatewayCrashed(String),

    /// The freshness policy rejected a package.
    #[error("Blocked {package}@{version}: {reason}")]
    PolicyBlocked {
        /// Blocked package name.
        package: String,
        /// Blocked version.
        version: String,
        /// Block reason reported by the gateway.
        reason: String,
    },

    /// The gateway reported a fatal error that is not tied to a package.
    #[error("Gateway reported an error: {0}")]
    GatewayReported(String),

    /// The requested package manager is not supported.
    #[error("Unsupported tool '{0}' (expected 'npm' or 'yarn')")]
    UnsupportedTool(String),

    /// A pass-through argument would bypass or weaken the gateway.
    #[error("Argument '{0}' is not allowed: the gateway controls this setting")]
    UnsupportedArgument(String),

    /// yarn 1.x can only be proxied over plain HTTP and the operator did not opt in.
    #[error(
        "yarn 1.x can only reach the gateway over plain HTTP; pass --allow-plain-http to accept this"
    )]
    PlainHttpNotAcknowledged,

    /// The project directory does not exist or is not a directory.
    #[error("Project directory {0:?} does not exist or is not a directory")]
    InvalidProjectDir(PathBuf),

    /// The run was interrupted by SIGINT/SIGTERM.
    #[error("Interrupted")]
    Cancelled,

    /// Signal transport failure.
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    /// Tool configuration could not be prepared.
    #[error("Tool configuration error: {0}")]
    ToolConfig(#[from] crate::toolconfig::EmitError),

    /// Run configuration could not be written.
    #[error("Run configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The readiness probe could not be set up.
    #[error("Failed to set up readiness probe: {0}")]
    Probe(String),

    /// Process spawn or wait failure.
    #[error("Process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit code for a run interrupted by SIGINT/SIGTERM.
pub const EXIT_INTERRUPTED: i32 = 130;

impl SupervisorError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::InvalidProjectDir(_) => 2,
            SupervisorError::Cancelled => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}
