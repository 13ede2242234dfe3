//! Policy engine error types.

use thiserror::Error;

/// Errors raised while evaluating a fetch against the freshness policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Publish metadata could not be obtained for a package.
    ///
    /// Covers network errors, non-success statuses, malformed bodies, and
    /// versions missing from the returned time map.
    #[error("Registry lookup failed for {package}: {reason}")]
    RegistryLookupFailed {
        /// Package whose metadata was requested.
        package: String,
        /// What went wrong.
        reason: String,
    },

    /// The registry base URL cannot be used to build a metadata URL.
    #[error("Invalid registry URL '{url}': {reason}")]
    InvalidRegistryUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build registry client: {0}")]
    Client(String),
}

impl PolicyError {
    /// Shorthand for a lookup failure.
    pub fn lookup_failed(package: &str, reason: impl Into<String>) -> Self {
        Self::RegistryLookupFailed {
            package: package.to_string(),
            reason: reason.into(),
        }
    }
}
