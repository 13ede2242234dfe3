//! Turning an operator request into concrete child process invocations.
//!
//! Everything here runs before any child is spawned, so a rejected request
//! (bad directory, unknown tool, disallowed flag, unacknowledged plain-HTTP
//! downgrade) never starts a process.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::SupervisorError;
use super::process::CommandSpec;
use crate::config::ProxyRunConfig;
use crate::toolconfig::{self, ToolTarget, yarn};

/// Pass-through flags that would re-route or weaken the gateway.
pub const REJECTED_FLAGS: &[&str] = &[
    "--registry",
    "--proxy",
    "--https-proxy",
    "--userconfig",
    "--cafile",
    "--strict-ssl",
    "--noproxy",
    "--use-yarnrc",
];

/// Proxy variables set for the tool, in both spellings.
const PROXY_ENV: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Variables that would exempt hosts from the proxy.
const NO_PROXY_ENV: &[&str] = &["NO_PROXY", "no_proxy"];

/// npm settings that re-route or weaken the gateway when inherited as
/// `npm_config_<name>` (npm matches the prefix case-insensitively).
const NPM_OVERRIDE_SETTINGS: &[&str] = &[
    "registry",
    "proxy",
    "https_proxy",
    "noproxy",
    "strict_ssl",
    "cafile",
    "ca",
    "userconfig",
];

/// yarn environment overrides with the same effect.
const YARN_OVERRIDE_ENV: &[&str] = &[
    "YARN_REGISTRY",
    "YARN_PROXY",
    "YARN_HTTP_PROXY",
    "YARN_HTTPS_PROXY",
    "YARN_STRICT_SSL",
    "YARN_ENABLE_STRICT_SSL",
    "YARN_CAFILE",
    "YARN_CA_FILE_PATH",
    "YARN_NPM_REGISTRY_SERVER",
    "YARN_USERCONFIG",
];

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Tool name as typed (`npm` or `yarn`).
    pub tool: String,
    /// Arguments for the tool.
    pub tool_args: Vec<String>,
    /// Directory the tool runs in.
    pub project_dir: PathBuf,
    /// Operator accepted the plain-HTTP link legacy yarn needs.
    pub allow_plain_http: bool,
    /// yarn major version override.
    pub yarn_major: Option<u32>,
    /// Diagnostic verbosity, passed on to the gateway.
    pub verbose: u8,
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Resolved tool flavour.
    pub tool: ToolTarget,
    /// Arguments for the tool.
    pub tool_args: Vec<String>,
    /// Canonical project directory.
    pub project_dir: PathBuf,
}

/// Validate a request.
///
/// Checks run in a fixed order: project directory, tool, arguments, then
/// the plain-HTTP acknowledgement.
pub fn plan(request: &RunRequest) -> Result<RunPlan, SupervisorError> {
    let project_dir = validate_project_dir(&request.project_dir)?;
    let tool = resolve_tool(&request.tool, &project_dir, request.yarn_major)?;
    check_tool_args(&request.tool_args)?;

    if !tool.supports_tls_proxy() && !request.allow_plain_http {
        return Err(SupervisorError::PlainHttpNotAcknowledged);
    }

    debug!("Planned {} run in {:?}", tool, project_dir);
    Ok(RunPlan {
        tool,
        tool_args: request.tool_args.clone(),
        project_dir,
    })
}

/// The project directory must exist and be a directory.
pub fn validate_project_dir(dir: &Path) -> Result<PathBuf, SupervisorError> {
    match dir.canonicalize() {
        Ok(path) if path.is_dir() => Ok(path),
        _ => Err(SupervisorError::InvalidProjectDir(dir.to_path_buf())),
    }
}

/// Map a tool name to a flavour, detecting the yarn major version unless given.
pub fn resolve_tool(
    name: &str,
    project_dir: &Path,
    yarn_major: Option<u32>,
) -> Result<ToolTarget, SupervisorError> {
    match name {
        "npm" => Ok(ToolTarget::Npm),
        "yarn" => {
            let major = match yarn_major {
                Some(major) => major,
                None => toolconfig::detect_yarn_major(project_dir)?,
            };
            Ok(ToolTarget::from_yarn_major(major))
        }
        other => Err(SupervisorError::UnsupportedTool(other.to_string())),
    }
}

/// Reject pass-through flags the gateway must control (`--flag` and `--flag=value`).
pub fn check_tool_args(args: &[String]) -> Result<(), SupervisorError> {
    for arg in args {
        let flag = arg.split_once('=').map_or(arg.as_str(), |(flag, _)| flag);
        if REJECTED_FLAGS.contains(&flag) {
            return Err(SupervisorError::UnsupportedArgument(arg.clone()));
        }
    }
    Ok(())
}

/// Command line and environment for the tool.
pub fn tool_invocation(plan: &RunPlan, run: &ProxyRunConfig) -> CommandSpec {
    let config_path = plan.tool.config_path(&run.config_dir);

    let mut spec = CommandSpec::new(plan.tool.program());
    spec = match plan.tool {
        ToolTarget::Npm => spec
            .args(&plan.tool_args)
            .arg("--userconfig")
            .arg(config_path),
        ToolTarget::YarnClassic => spec
            .arg("--use-yarnrc")
            .arg(config_path)
            .args(&plan.tool_args),
        ToolTarget::YarnBerry => {
            let mut spec = spec.args(&plan.tool_args);
            for (key, value) in yarn::berry_env(run) {
                spec = spec.env(key, value);
            }
            spec
        }
    };

    let proxy = run.tool_proxy_url();
    for key in PROXY_ENV {
        spec = spec.env(*key, proxy.clone());
    }
    spec = spec.env(
        "NODE_EXTRA_CA_CERTS",
        run.ca_bundle_path.display().to_string(),
    );
    let inherited = std::env::vars_os().filter_map(|(key, _)| key.into_string().ok());
    spec.env_remove = overridden_env(inherited);
    spec.cwd = Some(plan.project_dir.clone());
    spec
}

/// Variables the tool must not inherit.
///
/// Always lists the canonical spellings, plus any inherited variable that
/// matches one of them ignoring case. Variables the invocation sets itself
/// are applied after removal, so they survive.
fn overridden_env<I>(inherited: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut keys: Vec<String> = NO_PROXY_ENV.iter().map(|k| k.to_string()).collect();
    for setting in NPM_OVERRIDE_SETTINGS {
        keys.push(format!("npm_config_{setting}"));
        keys.push(format!("NPM_CONFIG_{}", setting.to_ascii_uppercase()));
    }
    keys.extend(YARN_OVERRIDE_ENV.iter().map(|k| k.to_string()));

    for key in inherited {
        if !keys.contains(&key) && keys.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
            debug!("Dropping inherited {} from the tool environment", key);
            keys.push(key);
        }
    }
    keys
}

/// Command line for the gateway process: this executable, hidden subcommand.
pub fn gateway_invocation(exe: &Path, run_dir: &Path, verbose: u8) -> CommandSpec {
    let mut spec = CommandSpec::new(exe);
    if verbose > 0 {
        spec = spec.arg(format!("-{}", "v".repeat(usize::from(verbose.min(3)))));
    }
    spec.arg("internal-gateway").arg("--run-dir").arg(run_dir)
}
