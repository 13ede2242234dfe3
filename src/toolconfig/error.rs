//! Config emitter error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while writing tool configuration.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Failed to create the output directory.
    #[error("Failed to create config directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a configuration file.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `yarn --version` could not be run or understood.
    #[error("Could not detect yarn version: {0}")]
    YarnDetection(String),
}
