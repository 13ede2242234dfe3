//! Command-line interface definitions for freshgate.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Supply-chain freshness gate for npm and yarn installs.
///
/// freshgate runs a package manager behind a local intercepting gateway
/// that refuses to download any package version published more recently
/// than a configured number of days.
#[derive(Parser, Debug)]
#[command(name = "freshgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit for a normal install run).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Package manager to run (npm or yarn).
    ///
    /// Required unless using a subcommand like `internal-gateway`.
    pub tool: Option<String>,

    /// Arguments to pass to the package manager.
    ///
    /// Defaults to `install` when omitted. Flags that would redirect the
    /// registry, proxy, or trust settings are rejected.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    /// Project directory to run the install in.
    #[arg(short = 'C', long = "project-dir", value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// Host the gateway listens on.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Port the gateway listens on.
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Minimum age in days a package version must have.
    #[arg(long = "min-package-age-days", value_name = "DAYS")]
    pub min_package_age_days: Option<u32>,

    /// Registry base URL used for publish-time lookups.
    #[arg(long = "registry", value_name = "URL")]
    pub registry: Option<String>,

    /// Accept the plain-HTTP proxy link that legacy yarn requires.
    #[arg(long = "allow-plain-http")]
    pub allow_plain_http: bool,

    /// Skip `yarn --version` detection and assume this major version.
    #[arg(long = "yarn-major", value_name = "N")]
    pub yarn_major: Option<u32>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for freshgate.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Internal gateway process (hidden).
    ///
    /// Spawned by the supervisor with a run directory holding the run
    /// configuration. It should not be invoked directly by users.
    #[command(name = "internal-gateway", hide = true)]
    InternalGateway {
        /// Run directory shared with the supervisor.
        #[arg(long = "run-dir", required = true)]
        run_dir: PathBuf,
    },
}

impl Cli {
    /// Arguments for the tool, defaulting to a plain install.
    pub fn effective_tool_args(&self) -> Vec<String> {
        if self.tool_args.is_empty() {
            vec!["install".to_string()]
        } else {
            self.tool_args.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["freshgate", "npm"]);
        assert_eq!(cli.tool, Some("npm".to_string()));
        assert!(cli.tool_args.is_empty());
        assert_eq!(cli.project_dir, PathBuf::from("."));
        assert!(!cli.allow_plain_http);
        assert_eq!(cli.verbose, 0);
        assert!(cli.command.is_none());
        assert_eq!(cli.effective_tool_args(), vec!["install"]);
    }

    #[test]
    fn test_cli_parse_with_args() {
        let cli = Cli::parse_from(["freshgate", "npm", "ci", "--omit=dev"]);
        assert_eq!(cli.tool, Some("npm".to_string()));
        assert_eq!(cli.tool_args, vec!["ci", "--omit=dev"]);
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "freshgate",
            "-C",
            "/work/app",
            "--port",
            "9090",
            "--min-package-age-days",
            "30",
            "--allow-plain-http",
            "--yarn-major",
            "1",
            "-vv",
            "yarn",
            "--",
            "add",
            "left-pad",
        ]);

        assert_eq!(cli.tool, Some("yarn".to_string()));
        assert_eq!(cli.project_dir, PathBuf::from("/work/app"));
        assert_eq!(cli.port, Some(9090));
        assert_eq!(cli.min_package_age_days, Some(30));
        assert!(cli.allow_plain_http);
        assert_eq!(cli.yarn_major, Some(1));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.tool_args, vec!["add", "left-pad"]);
    }

    #[test]
    fn test_internal_gateway_command() {
        let cli = Cli::parse_from(["freshgate", "internal-gateway", "--run-dir", "/tmp/run"]);

        assert!(cli.tool.is_none());
        match cli.command {
            Some(Commands::InternalGateway { run_dir }) => {
                assert_eq!(run_dir, PathBuf::from("/tmp/run"));
            }
            _ => panic!("Expected InternalGateway command"),
        }
    }
}
