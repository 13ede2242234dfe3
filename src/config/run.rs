//! The per-run record shared by the supervisor and the gateway process.
//!
//! Built once by the supervisor from the merged [`Config`], written as
//! `run.toml` into the run directory, and loaded by the gateway at startup.
//! Nothing mutates it afterwards.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, LookupFailurePolicy};
use crate::toolconfig::ToolTarget;

/// Filename of the run record inside the run directory.
pub const RUN_CONFIG_FILE: &str = "run.toml";

/// Immutable configuration for one freshgate run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyRunConfig {
    /// Host the gateway binds to.
    pub listen_host: String,
    /// Port the gateway binds to.
    pub listen_port: u16,
    /// Registry base URL for metadata lookups and tool configuration.
    pub registry_base_url: String,
    /// Freshness threshold in days.
    pub min_age_days: u32,
    /// PEM certificate of the ephemeral CA.
    pub ca_cert_path: PathBuf,
    /// PEM private key of the ephemeral CA.
    pub ca_key_path: PathBuf,
    /// Host CA bundle plus the ephemeral CA, handed to the tool.
    pub ca_bundle_path: PathBuf,
    /// Hosts whose tarball fetches are evaluated.
    pub registry_hosts: Vec<String>,
    /// Timeout for one metadata lookup, in seconds.
    pub lookup_timeout_secs: u64,
    /// Behavior when a metadata lookup fails.
    pub on_lookup_failure: LookupFailurePolicy,
    /// Network timeout written into yarn configuration, in milliseconds.
    pub network_timeout_ms: u64,
    /// Package manager flavour the configuration is emitted for.
    pub tool: ToolTarget,
    /// Directory the tool configuration is emitted into.
    pub config_dir: PathBuf,
    /// Directory holding the orchestration signal files.
    pub signal_dir: PathBuf,
}

impl ProxyRunConfig {
    /// Derive the run record from merged configuration.
    ///
    /// All generated paths live under `run_dir`, which the supervisor
    /// removes when the run ends.
    pub fn from_config(config: &Config, tool: ToolTarget, run_dir: &Path) -> Self {
        let ca_dir = run_dir.join("ca");
        Self {
            listen_host: config.gateway.listen_host().to_string(),
            listen_port: config.gateway.listen_port(),
            registry_base_url: config.policy.registry().to_string(),
            min_age_days: config.policy.min_age_days(),
            ca_cert_path: ca_dir.join("ca.crt"),
            ca_key_path: ca_dir.join("ca.key"),
            ca_bundle_path: ca_dir.join("bundle.pem"),
            registry_hosts: config.policy.registry_hosts.clone(),
            lookup_timeout_secs: config.policy.lookup_timeout().as_secs(),
            on_lookup_failure: config.policy.on_lookup_failure(),
            network_timeout_ms: config.tools.network_timeout_ms(),
            tool,
            config_dir: run_dir.join("tool"),
            signal_dir: run_dir.join("signals"),
        }
    }

    /// `host:port` with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Proxy URL with TLS between the tool and the gateway.
    pub fn proxy_url(&self) -> String {
        format!("https://{}", self.authority())
    }

    /// Proxy URL without TLS, for tools that cannot speak TLS to a proxy.
    pub fn plain_proxy_url(&self) -> String {
        format!("http://{}", self.authority())
    }

    /// The proxy URL the selected tool is configured with.
    pub fn tool_proxy_url(&self) -> String {
        if self.tool.supports_tls_proxy() {
            self.proxy_url()
        } else {
            self.plain_proxy_url()
        }
    }

    /// Liveness endpoint of the gateway.
    pub fn ping_url(&self) -> String {
        format!("{}/__proxy_ping", self.plain_proxy_url())
    }

    /// Load the run record from a run directory.
    pub fn load(run_dir: &Path) -> Result<Self, ConfigError> {
        let path = run_dir.join(RUN_CONFIG_FILE);
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError { path, source: e })
    }

    /// Write the run record into a run directory, atomically.
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = run_dir.join(RUN_CONFIG_FILE);
        let contents = toml::to_string_pretty(self)?;

        let write_err = |e: std::io::Error| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(run_dir).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!("Wrote run config to {:?}", path);
        Ok(path)
    }
}
