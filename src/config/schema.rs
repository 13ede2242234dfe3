//! Configuration schema definitions.
//!
//! This module defines the structure of the freshgate configuration files.
//! Every scalar is optional so that a later layer only overrides what it
//! actually sets; accessors fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default gateway listen host.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Default gateway listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default freshness threshold in days.
pub const DEFAULT_MIN_AGE_DAYS: u32 = 14;

/// Default registry base URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Default timeout for registry metadata lookups.
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Default supervisor poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default deadline for config and readiness waits.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;

/// Default grace period between terminate and kill.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Default network timeout handed to package managers.
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 60_000;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Gateway listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Freshness policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Supervisor timing settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Settings handed to the package manager.
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Parse the embedded default configuration.
    pub fn embedded_defaults() -> Result<Self, toml::de::Error> {
        toml::from_str(include_str!("../../config/default.toml"))
    }

    /// Merge another config into this one.
    ///
    /// Lists are merged (appended, without duplicates).
    /// Scalars are overridden when the other layer sets them.
    pub fn merge(&mut self, other: Config) {
        self.gateway.merge(other.gateway);
        self.policy.merge(other.policy);
        self.supervisor.merge(other.supervisor);
        self.tools.merge(other.tools);
    }
}

/// Gateway listener configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Host the gateway binds to and the tool connects to.
    #[serde(default)]
    pub listen_host: Option<String>,

    /// Port the gateway binds to.
    #[serde(default)]
    pub listen_port: Option<u16>,
}

impl GatewayConfig {
    fn merge(&mut self, other: GatewayConfig) {
        if other.listen_host.is_some() {
            self.listen_host = other.listen_host;
        }
        if other.listen_port.is_some() {
            self.listen_port = other.listen_port;
        }
    }

    /// Effective listen host.
    pub fn listen_host(&self) -> &str {
        self.listen_host.as_deref().unwrap_or(DEFAULT_LISTEN_HOST)
    }

    /// Effective listen port.
    pub fn listen_port(&self) -> u16 {
        self.listen_port.unwrap_or(DEFAULT_LISTEN_PORT)
    }
}

/// What the gateway does when publish metadata cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupFailurePolicy {
    /// Reject the fetch and abort the run.
    #[default]
    Block,
    /// Log a warning and forward the fetch.
    Allow,
}

/// Freshness policy configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Minimum age in days a version must have before it may be installed.
    #[serde(default)]
    pub min_age_days: Option<u32>,

    /// Registry base URL used for metadata lookups.
    #[serde(default)]
    pub registry: Option<String>,

    /// Additional hosts whose tarball downloads are checked.
    #[serde(default)]
    pub registry_hosts: Vec<String>,

    /// Timeout for a single metadata lookup, in seconds.
    #[serde(default)]
    pub lookup_timeout_secs: Option<u64>,

    /// Behavior when a metadata lookup fails.
    #[serde(default)]
    pub on_lookup_failure: Option<LookupFailurePolicy>,
}

impl PolicyConfig {
    fn merge(&mut self, other: PolicyConfig) {
        if other.min_age_days.is_some() {
            self.min_age_days = other.min_age_days;
        }
        if other.registry.is_some() {
            self.registry = other.registry;
        }
        for host in other.registry_hosts {
            if !self.registry_hosts.contains(&host) {
                self.registry_hosts.push(host);
            }
        }
        if other.lookup_timeout_secs.is_some() {
            self.lookup_timeout_secs = other.lookup_timeout_secs;
        }
        if other.on_lookup_failure.is_some() {
            self.on_lookup_failure = other.on_lookup_failure;
        }
    }

    /// Effective freshness threshold.
    pub fn min_age_days(&self) -> u32 {
        self.min_age_days.unwrap_or(DEFAULT_MIN_AGE_DAYS)
    }

    /// Effective registry base URL.
    pub fn registry(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY)
    }

    /// Effective lookup timeout.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs.unwrap_or(DEFAULT_LOOKUP_TIMEOUT_SECS))
    }

    /// Effective lookup failure behavior.
    pub fn on_lookup_failure(&self) -> LookupFailurePolicy {
        self.on_lookup_failure.unwrap_or_default()
    }
}

/// Supervisor timing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Poll interval for every supervisor wait loop, in milliseconds.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Deadline for the config and readiness waits, in seconds.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,

    /// Grace period between terminate and kill, in seconds.
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
}

impl SupervisorConfig {
    fn merge(&mut self, other: SupervisorConfig) {
        if other.poll_interval_ms.is_some() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.wait_timeout_secs.is_some() {
            self.wait_timeout_secs = other.wait_timeout_secs;
        }
        if other.grace_period_secs.is_some() {
            self.grace_period_secs = other.grace_period_secs;
        }
    }

    /// Effective poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Effective wait deadline.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS))
    }

    /// Effective teardown grace period.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs.unwrap_or(DEFAULT_GRACE_PERIOD_SECS))
    }
}

/// Settings written into the package manager's configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Network timeout for yarn, in milliseconds.
    #[serde(default)]
    pub network_timeout_ms: Option<u64>,
}

impl ToolsConfig {
    fn merge(&mut self, other: ToolsConfig) {
        if other.network_timeout_ms.is_some() {
            self.network_timeout_ms = other.network_timeout_ms;
        }
    }

    /// Effective network timeout.
    pub fn network_timeout_ms(&self) -> u64 {
        self.network_timeout_ms.unwrap_or(DEFAULT_NETWORK_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_builtin_fallbacks() {
        let config = Config::default();

        assert_eq!(config.gateway.listen_host(), DEFAULT_LISTEN_HOST);
        assert_eq!(config.gateway.listen_port(), DEFAULT_LISTEN_PORT);
        assert_eq!(config.policy.min_age_days(), DEFAULT_MIN_AGE_DAYS);
        assert_eq!(config.policy.on_lookup_failure(), LookupFailurePolicy::Block);
        assert_eq!(config.supervisor.poll_interval(), Duration::from_millis(100));
        assert!(config.policy.registry_hosts.is_empty());
    }

    #[test]
    fn test_default_toml_parses() {
        let config = Config::embedded_defaults().unwrap();

        assert_eq!(config.policy.min_age_days, Some(14));
        assert_eq!(config.policy.registry(), "https://registry.npmjs.org/");
        assert!(config.policy.registry_hosts.contains(&"registry.yarnpkg.com".to_string()));
        assert_eq!(config.supervisor.wait_timeout(), Duration::from_secs(120));
        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_merge_scalars() {
        let mut base = Config::embedded_defaults().unwrap();
        let other: Config = toml::from_str(
            r#"
            [policy]
            min_age_days = 0
            on_lookup_failure = "allow"
            "#,
        )
        .unwrap();

        base.merge(other);

        // Zero is a real value, not "unset"
        assert_eq!(base.policy.min_age_days(), 0);
        assert_eq!(base.policy.on_lookup_failure(), LookupFailurePolicy::Allow);
        // Untouched scalars survive
        assert_eq!(base.gateway.listen_port(), 8080);
    }

    #[test]
    fn test_config_merge_lists() {
        let mut base = Config::embedded_defaults().unwrap();
        let other: Config = toml::from_str(
            r#"
            [policy]
            registry_hosts = ["npm.internal.corp", "registry.npmjs.org"]
            "#,
        )
        .unwrap();

        base.merge(other);

        let hosts = &base.policy.registry_hosts;
        assert!(hosts.contains(&"npm.internal.corp".to_string()));
        assert_eq!(
            hosts.iter().filter(|h| *h == "registry.npmjs.org").count(),
            1
        );
    }

    #[test]
    fn test_unknown_lookup_policy_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [policy]
            on_lookup_failure = "maybe"
            "#,
        );
        assert!(result.is_err());
    }
}
