//! Gateway error types.

use thiserror::Error;

use crate::ca::CaError;
use crate::config::ConfigError;
use crate::orchestrator::SignalError;
use crate::policy::PolicyError;
use crate::toolconfig::EmitError;

/// Errors that can occur in the interception gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error (network, file system).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Failed to bind the listen address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed proxy request.
    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    /// TLS handshake or configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Failed to connect to the upstream server.
    #[error("Failed to connect to upstream {addr}: {message}")]
    UpstreamConnect {
        /// Upstream address.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Ephemeral CA failure.
    #[error("Certificate error: {0}")]
    Ca(#[from] CaError),

    /// Policy construction failure.
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Run configuration could not be loaded.
    #[error("Run configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tool configuration could not be emitted.
    #[error("Tool configuration error: {0}")]
    Emit(#[from] EmitError),

    /// Signal file could not be written.
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
}

impl From<rustls::Error> for GatewayError {
    fn from(e: rustls::Error) -> Self {
        GatewayError::Tls(e.to_string())
    }
}

impl GatewayError {
    /// Whether this is an ordinary client disconnect rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        let text = self.to_string().to_ascii_lowercase();
        text.contains("connection reset") || text.contains("broken pipe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::UpstreamConnect {
            addr: "registry.npmjs.org:443".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to upstream registry.npmjs.org:443: connection refused"
        );
    }

    #[test]
    fn test_is_disconnect() {
        let reset = GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "Connection reset by peer",
        ));
        assert!(reset.is_disconnect());
        assert!(!GatewayError::Tls("bad cert".into()).is_disconnect());
    }
}
