//! Startup garbage collection for run directories of crashed supervisors.
//!
//! Each run lives in `$TMPDIR/freshgate-run-<pid>-<random>/` and is removed
//! when the supervisor returns. A supervisor killed with SIGKILL leaves its
//! directory behind, including the ephemeral CA key. Before starting a new
//! run we remove directories whose owning PID is gone. Directories whose
//! owner cannot be read from the name are removed once older than a day; a
//! live owner's directory is never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Name prefix of run directories.
pub const RUN_DIR_PREFIX: &str = "freshgate-run-";

/// Age after which a run directory with no readable owner is stale.
const MAX_RUN_DIR_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Prefix for a run directory owned by `pid`.
pub fn run_dir_prefix(pid: u32) -> String {
    format!("{RUN_DIR_PREFIX}{pid}-")
}

/// Remove stale run directories from the system temp directory.
pub fn cleanup_stale_run_dirs() {
    let removed = cleanup_stale_run_dirs_in(&std::env::temp_dir());
    if !removed.is_empty() {
        info!("Removed {} stale run directories", removed.len());
    }
}

/// Remove stale run directories under `parent`, returning what was removed.
pub fn cleanup_stale_run_dirs_in(parent: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(parent) {
        Ok(e) => e,
        Err(e) => {
            debug!("Cannot read {:?}: {}", parent, e);
            return Vec::new();
        }
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let Some(rest) = name_str.strip_prefix(RUN_DIR_PREFIX) else {
            continue;
        };

        let owner = rest.split('-').next().and_then(|pid| pid.parse::<u32>().ok());
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());

        if !is_stale(owner, age) {
            debug!("Run directory {} is in use, skipping", name_str);
            continue;
        }

        info!("Cleaning up stale run directory: {}", name_str);
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed.push(entry.path()),
            Err(e) => warn!("Failed to remove stale run directory {}: {}", name_str, e),
        }
    }
    removed
}

/// Whether a run directory with this owner and age may be removed.
fn is_stale(owner: Option<u32>, age: Option<Duration>) -> bool {
    match owner {
        Some(pid) => pid != std::process::id() && !process_exists(pid),
        None => age.is_some_and(|age| age > MAX_RUN_DIR_AGE),
    }
}

/// Check if a process with the given PID exists.
fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
