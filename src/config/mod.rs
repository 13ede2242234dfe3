//! Configuration system for freshgate.
//!
//! This module provides TOML configuration loading with hierarchy merging,
//! plus the immutable per-run record handed from the supervisor to the
//! gateway process.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`)
//! 2. System config: `/etc/freshgate/config.toml`
//! 3. User config: `~/.config/freshgate/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! # Merge Behavior
//!
//! - **Lists** (`registry_hosts`) are **merged** (appended)
//! - **Scalars** (`min_age_days`, `listen_port`, etc.) are **overridden**
//!
//! # Example
//!
//! ```toml
//! [policy]
//! min_age_days = 30
//! registry = "https://registry.npmjs.org/"
//! on_lookup_failure = "block"
//! ```

mod error;
mod loader;
mod run;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use run::{ProxyRunConfig, RUN_CONFIG_FILE};
pub use schema::{
    Config, GatewayConfig, LookupFailurePolicy, PolicyConfig, SupervisorConfig, ToolsConfig,
};
