//! Error-log watcher.
//!
//! Watches external error-log creation events on the bus; for each new log
//! whose message is in the compile-time allowlist, a BMC dump of the
//! matching kind is requested. The set of log ids already acted on is
//! persisted in a binary archive so restarts do not duplicate dumps;
//! a corrupt archive is deleted and the set restarts empty.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::error::DumpError;
use crate::families::bmc::BmcDumpKind;

/// Error-log messages the watcher reacts to. A log whose message is not
/// listed here is ignored.
pub const MESSAGE_ALLOWLIST: &[&str] = &[
    "Platform.Error.Application.Cored",
    "Platform.Error.InternalFailure",
    "Platform.Error.Checkstop",
];

/// Message that maps to an application-core dump.
const APPLICATION_CORED: &str = "Platform.Error.Application.Cored";

/// Tracks which external error logs have already caused a dump.
#[derive(Debug)]
pub struct ErrorLogWatcher {
    state_path: PathBuf,
    handled: BTreeSet<u32>,
}

impl ErrorLogWatcher {
    /// Load the persisted id set from `state_path`.
    ///
    /// A missing file starts empty; a corrupt file is deleted and also
    /// starts empty.
    #[must_use]
    pub fn load(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let handled = read_id_set(&state_path);
        Self {
            state_path,
            handled,
        }
    }

    /// Decide whether a new error log warrants a BMC dump.
    ///
    /// Returns the dump kind to collect, or `None` when the message is not
    /// allowlisted or the log id was already handled.
    #[must_use]
    pub fn classify(&self, log_id: u32, message: &str) -> Option<BmcDumpKind> {
        if self.handled.contains(&log_id) {
            return None;
        }
        if !MESSAGE_ALLOWLIST.contains(&message) {
            return None;
        }
        if message == APPLICATION_CORED {
            Some(BmcDumpKind::ApplicationCored)
        } else {
            Some(BmcDumpKind::UserRequested)
        }
    }

    /// Record a log id as handled and persist the set.
    ///
    /// # Errors
    ///
    /// Returns [`DumpError::Internal`] if the archive cannot be written;
    /// the in-memory set is updated regardless.
    pub fn record(&mut self, log_id: u32) -> Result<(), DumpError> {
        self.handled.insert(log_id);
        let bytes = bincode::serialize(&self.handled)
            .map_err(|e| DumpError::Internal(format!("serialize error-log id set: {e}")))?;
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DumpError::Internal(format!("create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(&self.state_path, bytes).map_err(|e| {
            DumpError::Internal(format!("write {}: {e}", self.state_path.display()))
        })
    }

    /// Number of handled log ids.
    #[must_use]
    pub fn handled_count(&self) -> usize {
        self.handled.len()
    }
}

fn read_id_set(path: &Path) -> BTreeSet<u32> {
    if !path.exists() {
        return BTreeSet::new();
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read error-log id set");
            return BTreeSet::new();
        },
    };

    match bincode::deserialize(&bytes) {
        Ok(set) => set,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt error-log id set, starting empty");
            if let Err(e) = std::fs::remove_file(path) {
                error!(path = %path.display(), error = %e, "failed to remove corrupt id set");
            }
            BTreeSet::new()
        },
    }
}
