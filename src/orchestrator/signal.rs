//! File-based orchestration signals.
//!
//! The gateway and the supervisor share one run-scoped directory. Each
//! signal kind has a fixed file name and holds a single JSON document:
//!
//! ```json
//! {"kind":"error","timestamp":"2026-01-07T14:32:01Z","payload":"...","package":{"name":"x","version":"1.0.0"}}
//! ```
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so a reader sees either no file or a complete document. A later
//! write of the same kind replaces the earlier one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::SignalError;
use crate::policy::PackageReference;

/// The three cross-process events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Gateway has emitted the tool configuration and is about to serve.
    Ready,
    /// Gateway blocked a package or hit a fatal error.
    Error,
    /// Tool exit code, recorded after the tool exits.
    Done,
}

impl SignalKind {
    /// File name of this signal inside the signal directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            SignalKind::Ready => "ready.json",
            SignalKind::Error => "error.json",
            SignalKind::Done => "done.json",
        }
    }
}

/// One signal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationSignal {
    /// Which event this is.
    pub kind: SignalKind,
    /// When the producer wrote it.
    pub timestamp: DateTime<Utc>,
    /// Free text: block reason, error message or exit code.
    pub payload: String,
    /// Blocked artifact, for policy blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageReference>,
}

impl OrchestrationSignal {
    /// Create a signal stamped with the current time.
    pub fn new(kind: SignalKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload: payload.into(),
            package: None,
        }
    }

    /// Attach the artifact this signal is about.
    pub fn with_package(mut self, package: PackageReference) -> Self {
        self.package = Some(package);
        self
    }
}

/// Run-scoped directory holding the signal files.
#[derive(Debug, Clone)]
pub struct SignalDir {
    root: PathBuf,
}

impl SignalDir {
    /// Create the directory (if needed) and return a handle to it.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, SignalError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SignalError::CreateDir {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    /// Handle to an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a signal file.
    pub fn path(&self, kind: SignalKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    /// Atomically write a signal, replacing any earlier one of the same kind.
    pub fn write(&self, signal: &OrchestrationSignal) -> Result<PathBuf, SignalError> {
        let path = self.path(signal.kind);
        let json = serde_json::to_vec(signal)?;

        let write_err = |e: std::io::Error| SignalError::Write {
            path: path.clone(),
            source: e,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(kind = ?signal.kind, path = ?path, "wrote signal");
        Ok(path)
    }

    /// Shorthand for writing a new signal with a payload.
    pub fn raise(&self, kind: SignalKind, payload: impl Into<String>) -> Result<PathBuf, SignalError> {
        self.write(&OrchestrationSignal::new(kind, payload))
    }

    /// Read a signal if it has been written.
    pub fn read(&self, kind: SignalKind) -> Result<Option<OrchestrationSignal>, SignalError> {
        let path = self.path(kind);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(kind = ?kind, "signal not present");
                return Ok(None);
            }
            Err(e) => return Err(SignalError::Read { path, source: e }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SignalError::Malformed { path, source: e })
    }

    /// Whether a signal of this kind has been written.
    pub fn exists(&self, kind: SignalKind) -> bool {
        self.path(kind).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_signal_is_none() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::create(dir.path().join("signals")).unwrap();

        assert!(!signals.exists(SignalKind::Error));
        assert!(signals.read(SignalKind::Error).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::create(dir.path()).unwrap();

        let signal = OrchestrationSignal::new(SignalKind::Error, "too new")
            .with_package(PackageReference::new("@scope/pkg", "1.0.0"));
        signals.write(&signal).unwrap();

        let read = signals.read(SignalKind::Error).unwrap().unwrap();
        assert_eq!(read, signal);
        assert!(signals.path(SignalKind::Error).ends_with("error.json"));
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::create(dir.path()).unwrap();

        signals.raise(SignalKind::Done, "0").unwrap();
        signals.raise(SignalKind::Done, "3").unwrap();

        let read = signals.read(SignalKind::Done).unwrap().unwrap();
        assert_eq!(read.payload, "3");
        // Only the signal file, no leftover temp files
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_malformed_signal_is_an_error() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::create(dir.path()).unwrap();
        fs::write(signals.path(SignalKind::Ready), "{not json").unwrap();

        assert!(matches!(
            signals.read(SignalKind::Ready),
            Err(SignalError::Malformed { .. })
        ));
    }

    #[test]
    fn test_package_field_omitted_when_absent() {
        let signal = OrchestrationSignal::new(SignalKind::Ready, "");
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"kind\":\"ready\""));
        assert!(!json.contains("package"));
    }
}
