//! freshgate: supply-chain freshness gate for npm and yarn
//!
//! This is the main entry point for the freshgate binary. It handles CLI
//! argument parsing, configuration loading, telemetry initialization, and
//! hands off to either the supervisor or the internal gateway process.
//!
//! # I/O Architecture
//!
//! The wrapped package manager owns stdout. freshgate never writes to it:
//!
//! - **Audit logging**: Goes to syslog, so it never interferes with the
//!   wrapped tool
//! - **Debug logging**: `tracing` output on stderr, silent by default
//! - **Operator messages**: Run summary and errors on stderr

use anyhow::{Context, Result};
use clap::Parser;
use freshgate::{
    cli::Cli,
    cli_handler,
    config::ConfigLoader,
    telemetry::{self, TelemetryError},
};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    // Syslog never touches stdout/stderr; a missing daemon degrades to a null logger
    match telemetry::init_logger() {
        Ok(()) | Err(TelemetryError::AlreadyInitialized) => {}
        Err(e) => return Err(e).context("Failed to initialize telemetry"),
    }

    if let Some(command) = cli.command {
        return cli_handler::handle_command(command);
    }

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    let request = cli_handler::run_request(&cli)?;
    let report = cli_handler::run_supervised(&request, &config)?;

    if let Some(error) = &report.error {
        eprintln!("freshgate: {}", error);
    }
    std::process::exit(report.exit_code)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
