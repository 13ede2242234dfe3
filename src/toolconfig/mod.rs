//! Tool configuration emitter.
//!
//! Writes the proxy and trust settings a package manager needs to route all
//! registry traffic through the gateway. File names are fixed per tool so
//! the paths can be printed for the operator and re-running the emitter
//! overwrites rather than accumulates.
//!
//! | Tool | File | Proxy |
//! |---|---|---|
//! | npm | `freshgate.npmrc` | `https://host:port` |
//! | yarn 2+ | `.yarnrc.yml` (+ `YARN_*` env) | `https://host:port` |
//! | yarn 1 | `freshgate.yarnrc` | `http://host:port`, `strict-ssl false` |

mod error;
pub mod npm;
pub mod yarn;

pub use error::EmitError;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProxyRunConfig;

/// Package manager flavour a configuration is emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTarget {
    /// npm.
    Npm,
    /// yarn 2 and later.
    YarnBerry,
    /// yarn 1.x.
    YarnClassic,
}

impl ToolTarget {
    /// Pick the yarn flavour for a major version.
    pub fn from_yarn_major(major: u32) -> Self {
        if major >= 2 {
            ToolTarget::YarnBerry
        } else {
            ToolTarget::YarnClassic
        }
    }

    /// Executable name.
    pub fn program(&self) -> &'static str {
        match self {
            ToolTarget::Npm => "npm",
            ToolTarget::YarnBerry | ToolTarget::YarnClassic => "yarn",
        }
    }

    /// Whether the tool can reach the gateway over TLS.
    pub fn supports_tls_proxy(&self) -> bool {
        !matches!(self, ToolTarget::YarnClassic)
    }

    /// Name of the emitted configuration file.
    pub fn config_file_name(&self) -> &'static str {
        match self {
            ToolTarget::Npm => npm::NPMRC_FILE,
            ToolTarget::YarnBerry => yarn::BERRY_RC_FILE,
            ToolTarget::YarnClassic => yarn::CLASSIC_RC_FILE,
        }
    }

    /// Emitted configuration file path inside `out_dir`.
    pub fn config_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(self.config_file_name())
    }
}

impl std::fmt::Display for ToolTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolTarget::Npm => write!(f, "npm"),
            ToolTarget::YarnBerry => write!(f, "yarn (2+)"),
            ToolTarget::YarnClassic => write!(f, "yarn (1.x)"),
        }
    }
}

/// Write the configuration for `tool` into `out_dir`.
///
/// Returns the paths written, in a fixed order.
pub fn write_config(
    tool: ToolTarget,
    out_dir: &Path,
    run: &ProxyRunConfig,
) -> Result<Vec<PathBuf>, EmitError> {
    fs::create_dir_all(out_dir).map_err(|e| EmitError::CreateDir {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let contents = match tool {
        ToolTarget::Npm => npm::render(run),
        ToolTarget::YarnBerry => yarn::render_berry(run),
        ToolTarget::YarnClassic => {
            warn!(
                "yarn 1.x cannot use an HTTPS proxy: the tool will reach the gateway over plain HTTP \
                 ({}) with strict-ssl disabled",
                run.plain_proxy_url()
            );
            yarn::render_classic(run)
        }
    };

    let path = tool.config_path(out_dir);
    write_atomic(&path, &contents)?;
    debug!("Wrote {} config to {:?}", tool, path);

    Ok(vec![path])
}

/// Write a file by renaming a fully written temp file over it.
///
/// Readers polling for the file never observe a partial write.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), EmitError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let write_err = |e: std::io::Error| EmitError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Major version of the `yarn` that would run in `project_dir`.
pub fn detect_yarn_major(project_dir: &Path) -> Result<u32, EmitError> {
    let yarn = which::which("yarn")
        .map_err(|e| EmitError::YarnDetection(format!("yarn not found on PATH: {e}")))?;

    let output = Command::new(&yarn)
        .arg("--version")
        .current_dir(project_dir)
        .output()
        .map_err(|e| EmitError::YarnDetection(format!("failed to run {}: {e}", yarn.display())))?;

    if !output.status.success() {
        return Err(EmitError::YarnDetection(format!(
            "`yarn --version` exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_major(&stdout).ok_or_else(|| {
        EmitError::YarnDetection(format!("unrecognized version string '{}'", stdout.trim()))
    })
}

/// Leading major version number of a version string (`"1.22.19"` -> 1).
pub fn parse_major(version: &str) -> Option<u32> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let major: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    major.parse().ok()
}
