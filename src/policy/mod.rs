//! Freshness policy: which package versions are too new to install.
//!
//! - [`tarball`]: package identity from registry archive paths
//! - [`registry`]: publish-time metadata lookups
//! - [`freshness`]: the allow/block decision

mod error;
pub mod freshness;
pub mod registry;
pub mod tarball;

pub use error::PolicyError;
pub use freshness::{Decision, FreshnessPolicy, FreshnessVerdict, decide};
pub use registry::{MetadataSource, PublishRecord, PublishTimes, RegistryClient};
pub use tarball::{PackageReference, parse_tarball_path};
