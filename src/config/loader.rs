//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/freshgate/config.toml`
//! 3. User config: `~/.config/freshgate/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Lists (registry_hosts) are **merged** (appended).
//! Scalars (min_age_days, listen_port) are **overridden**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, GatewayConfig, PolicyConfig};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/freshgate/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "freshgate";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system/user files are skipped. A missing `--config` file,
    /// invalid TOML, and out-of-range values are errors.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::embedded_defaults().map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<embedded:default.toml>"),
            source: e,
        })?;
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        config.merge(Self::cli_overrides(cli));

        validate(&config)?;
        Ok(config)
    }

    /// Build a config layer from the CLI flags.
    fn cli_overrides(cli: &Cli) -> Config {
        Config {
            gateway: GatewayConfig {
                listen_host: cli.host.clone(),
                listen_port: cli.port,
            },
            policy: PolicyConfig {
                min_age_days: cli.min_package_age_days,
                registry: cli.registry.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject merged values that cannot produce a working run.
fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.gateway.listen_host().trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "gateway.listen_host".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.gateway.listen_port() == 0 {
        return Err(ConfigError::InvalidValue {
            field: "gateway.listen_port".to_string(),
            message: "must be a fixed port between 1 and 65535".to_string(),
        });
    }

    let registry = config.policy.registry();
    match url::Url::parse(registry) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
        Ok(_) => {
            return Err(ConfigError::InvalidValue {
                field: "policy.registry".to_string(),
                message: format!("'{}' is not an http(s) URL", registry),
            });
        }
        Err(e) => {
            return Err(ConfigError::InvalidValue {
                field: "policy.registry".to_string(),
                message: format!("'{}': {}", registry, e),
            });
        }
    }

    if config.supervisor.poll_interval().is_zero() {
        return Err(ConfigError::InvalidValue {
            field: "supervisor.poll_interval_ms".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookupFailurePolicy;
    use clap::Parser;
    use tempfile::tempdir;

    fn create_test_cli() -> Cli {
        Cli::parse_from(["freshgate", "npm"])
    }

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = loader_in(dir.path());

        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.policy.min_age_days(), 14);
        assert_eq!(config.gateway.listen_port(), 8080);
        assert_eq!(config.policy.on_lookup_failure(), LookupFailurePolicy::Block);
        assert!(config.policy.registry_hosts.contains(&"registry.npmjs.org".to_string()));
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[policy]\nmin_age_days = 7\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[policy]\nmin_age_days = 21\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli()).unwrap();

        assert_eq!(config.policy.min_age_days(), 21);
    }

    #[test]
    fn test_lists_are_merged() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[policy]\nregistry_hosts = [\"npm.internal.example\"]\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli()).unwrap();

        let hosts = &config.policy.registry_hosts;
        assert!(hosts.contains(&"registry.npmjs.org".to_string()));
        assert!(hosts.contains(&"npm.internal.example".to_string()));
    }

    #[test]
    fn test_cli_flags_override_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[gateway]\nlisten_port = 9000\n[policy]\nmin_age_days = 21\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "freshgate",
            "--port",
            "9100",
            "--min-package-age-days",
            "0",
            "npm",
        ]);
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.gateway.listen_port(), 9100);
        assert_eq!(config.policy.min_age_days(), 0);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("absent.toml"));

        let err = loader_in(dir.path()).load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "this is not valid TOML [[[").unwrap();

        let err = loader_in(dir.path()).load(&create_test_cli()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_invalid_registry_rejected() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["freshgate", "--registry", "ftp://mirror", "npm"]);

        let err = loader_in(dir.path()).load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "policy.registry"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["freshgate", "--port", "0", "npm"]);

        let err = loader_in(dir.path()).load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
