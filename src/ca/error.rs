//! Error types for certificate provisioning.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while issuing or exporting CA material.
///
/// Any of these is fatal to the run: without a trust root the gateway
/// cannot intercept anything.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Failed to sign a leaf certificate.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// The host name cannot be placed in a certificate.
    #[error("Invalid certificate subject '{0}'")]
    InvalidSubject(String),

    /// Failed to create a directory for CA files.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write certificate, key, or bundle file.
    #[error("Failed to write {path}: {source}")]
    WriteFile {
        /// File that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to read the host CA bundle.
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_error_display() {
        let err = CaError::KeyGeneration("random number generator failed".to_string());
        assert!(err.to_string().contains("random number generator failed"));

        let err = CaError::WriteFile {
            path: PathBuf::from("/run/ca/ca.key"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/run/ca/ca.key"));
    }
}
