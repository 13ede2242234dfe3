//! freshgate: supply-chain freshness gate for npm and yarn
//!
//! This crate runs a package manager behind a local intercepting gateway
//! that refuses to let it download any package version published less
//! than a configured number of days ago. Freshly published versions are
//! where most registry compromises live; waiting them out is cheap.
//!
//! # Security Model
//!
//! The model is **fail-closed**: a single blocked tarball aborts the whole
//! install, and a package manager that cannot be routed through the
//! gateway is never started.
//!
//! # Architecture
//!
//! - **CA**: Ephemeral per-run certificate authority for TLS interception
//! - **Policy**: Tarball URL parsing, registry publish-time lookups, verdicts
//! - **Gateway**: hyper + rustls proxy that applies the policy per request
//! - **Toolconfig**: npm / yarn configuration pointing at the gateway
//! - **Orchestrator**: Supervisor process, signal files, teardown
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ca;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod policy;
pub mod telemetry;
pub mod toolconfig;
