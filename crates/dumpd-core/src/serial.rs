//! Sidecar persistence for dump entries.
//!
//! Each entry persists its full attribute set as a single JSON document at
//! `<dump-dir>/.preserve/serialized_entry.json` so it can be restored after
//! a daemon restart without rerunning the collector. The document carries a
//! serialization version; readers reject documents written by an unknown
//! version.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::Entry;
use crate::error::DumpError;

/// Current serialization version. Increment on any change to the persisted
/// entry schema.
pub const SERIALIZATION_VERSION: u32 = 1;

/// Directory holding serialized dump contents, relative to the dump dir.
pub const PRESERVE_DIR: &str = ".preserve";

/// File name of the serialized entry document.
pub const SERIAL_FILE: &str = "serialized_entry.json";

#[derive(Deserialize)]
struct SerializedEntry<A> {
    version: u32,
    entry: Entry<A>,
}

#[derive(Serialize)]
struct SerializedEntryRef<'a, A> {
    version: u32,
    entry: &'a Entry<A>,
}

/// Serialize `entry` into the `.preserve` sidecar under `dump_dir`.
///
/// # Errors
///
/// Returns [`DumpError::Internal`] if the sidecar directory or file cannot
/// be written.
pub fn store<A: Serialize>(dump_dir: &Path, entry: &Entry<A>) -> Result<(), DumpError> {
    let preserve = dump_dir.join(PRESERVE_DIR);
    fs::create_dir_all(&preserve)
        .map_err(|e| DumpError::Internal(format!("create {}: {e}", preserve.display())))?;

    let doc = SerializedEntryRef {
        version: SERIALIZATION_VERSION,
        entry,
    };
    let path = preserve.join(SERIAL_FILE);
    let json = serde_json::to_vec_pretty(&doc)
        .map_err(|e| DumpError::Internal(format!("serialize entry {}: {e}", entry.id)))?;
    fs::write(&path, json)
        .map_err(|e| DumpError::Internal(format!("write {}: {e}", path.display())))
}

/// Load a serialized entry from the `.preserve` sidecar under `dump_dir`.
///
/// Returns `Ok(None)` when no sidecar exists. A sidecar that cannot be
/// parsed, or that was written by an unknown serialization version, is
/// treated as absent (logged and skipped) so restore can continue from the
/// payload alone.
///
/// # Errors
///
/// Returns [`DumpError::Internal`] only for I/O failures reading an existing
/// file.
pub fn load<A: DeserializeOwned>(dump_dir: &Path) -> Result<Option<Entry<A>>, DumpError> {
    let path = dump_dir.join(PRESERVE_DIR).join(SERIAL_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path)
        .map_err(|e| DumpError::Internal(format!("read {}: {e}", path.display())))?;

    let doc: SerializedEntry<A> = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable entry sidecar");
            return Ok(None);
        },
    };

    if doc.version != SERIALIZATION_VERSION {
        warn!(
            path = %path.display(),
            version = doc.version,
            expected = SERIALIZATION_VERSION,
            "discarding entry sidecar with unknown serialization version"
        );
        return Ok(None);
    }

    Ok(Some(doc.entry))
}
