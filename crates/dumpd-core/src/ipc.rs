//! IPC wire types and framing.
//!
//! The engine's bus surface is served over a Unix domain socket carrying
//! length-prefixed JSON frames: a 4-byte big-endian payload length followed
//! by one serialized [`IpcRequest`] or [`IpcResponse`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entry::{DumpFamily, Entry, OperationStatus};
use crate::error::DumpError;

/// Maximum accepted frame payload (1 MB). Requests are tiny; anything
/// larger is a protocol violation.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Frame a payload with its 4-byte big-endian length prefix.
#[must_use]
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Decode a frame's length prefix.
#[must_use]
pub fn parse_frame_length(header: [u8; 4]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// Requests accepted on the bus socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Create a dump of the given family.
    CreateDump {
        /// Target family.
        family: DumpFamily,
        /// Family parameters (string to string).
        #[serde(default)]
        params: BTreeMap<String, String>,
    },

    /// Enumerate a family's catalog.
    ListEntries {
        /// Target family.
        family: DumpFamily,
    },

    /// Inspect one entry.
    GetEntry {
        /// Target family.
        family: DumpFamily,
        /// Entry identifier.
        id: u32,
    },

    /// Delete one entry (payload directory and catalog record).
    DeleteEntry {
        /// Target family.
        family: DumpFamily,
        /// Entry identifier.
        id: u32,
    },

    /// Ask the offload subsystem to transfer an entry's payload.
    InitiateOffload {
        /// Target family.
        family: DumpFamily,
        /// Entry identifier.
        id: u32,
        /// Destination URI.
        uri: String,
    },

    /// Obtain a read-only descriptor for an entry's payload. The
    /// descriptor follows the response as SCM_RIGHTS ancillary data.
    GetFileHandle {
        /// Target family.
        family: DumpFamily,
        /// Entry identifier.
        id: u32,
    },

    /// Announce a new external error-log object to the error-log watcher.
    NotifyErrorLog {
        /// External log identifier.
        id: u32,
        /// The log's message property.
        message: String,
    },

    /// Read the retimer debug-mode singleton.
    GetRetimerDebugMode,

    /// Record the retimer vendor id supplied by the platform service.
    SetRetimerVendorId {
        /// Vendor id forwarded to the retimer collectors.
        vendor_id: String,
    },

    /// Engine status summary.
    Status,
}

/// Responses sent back on the bus socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// A dump collection started. `object_path` is absent for collector
    /// actions that add no catalog entry.
    DumpCreated {
        /// Object path of the new entry.
        object_path: Option<String>,
    },

    /// Catalog listing in identifier order.
    Entries {
        /// One record per entry.
        entries: Vec<EntryInfo>,
    },

    /// Single entry record.
    Entry {
        /// The entry.
        entry: EntryInfo,
    },

    /// The entry was deleted.
    Deleted,

    /// The offload request was accepted.
    OffloadInitiated {
        /// URI recorded on the entry.
        uri: String,
    },

    /// A file descriptor follows as ancillary data.
    FileHandle {
        /// Payload size in bytes.
        size: u64,
    },

    /// Generic acknowledgement.
    Ack,

    /// Retimer debug-mode state.
    RetimerDebugMode {
        /// Whether a retimer-LTSSM collection is in flight.
        enabled: bool,
        /// Vendor id recorded for the retimer collectors.
        vendor_id: Option<String>,
    },

    /// Engine status summary.
    Status {
        /// Daemon uptime in seconds.
        uptime_secs: u64,
        /// One block per enabled family.
        families: Vec<FamilyStatus>,
    },

    /// The request failed.
    Error {
        /// Error taxonomy kind.
        kind: IpcErrorKind,
        /// Human-readable context.
        message: String,
    },
}

/// Wire rendition of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpcErrorKind {
    /// Malformed or unknown parameter.
    InvalidArgument,
    /// Mutually-exclusive collection in flight.
    Unavailable,
    /// Byte cap reached and rotation disabled.
    QuotaExceeded,
    /// No such entry.
    NotFound,
    /// Payload could not be opened.
    Open,
    /// Unexpected engine failure.
    Internal,
}

impl From<&DumpError> for IpcErrorKind {
    fn from(err: &DumpError) -> Self {
        match err {
            DumpError::InvalidArgument { .. } => Self::InvalidArgument,
            DumpError::Unavailable(_) | DumpError::NoFile => Self::Unavailable,
            DumpError::QuotaExceeded(_) => Self::QuotaExceeded,
            DumpError::NotFound(_) => Self::NotFound,
            DumpError::Open(_) => Self::Open,
            DumpError::Internal(_) => Self::Internal,
        }
    }
}

impl IpcResponse {
    /// Error response for a failed operation.
    #[must_use]
    pub fn from_error(err: &DumpError) -> Self {
        Self::Error {
            kind: IpcErrorKind::from(err),
            message: err.to_string(),
        }
    }
}

/// Wire rendition of a dump entry's attribute surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Entry identifier.
    pub id: u32,
    /// Bus object path.
    pub object_path: String,
    /// Operation status.
    pub status: OperationStatus,
    /// Creation time, microseconds since the epoch.
    pub start_time_us: u64,
    /// Most recent progress marker, microseconds since the epoch.
    pub elapsed_us: u64,
    /// Completion time, microseconds since the epoch; 0 while non-terminal.
    pub completed_time_us: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// Collection progress, 0..=100.
    pub progress: u8,
    /// Whether an offload was accepted.
    pub offloaded: bool,
    /// Offload URI, empty unless initiated.
    pub offload_uri: String,
    /// Payload path, empty until the collector produced it.
    pub file: String,
    /// Requester id.
    pub originator_id: String,
    /// Requester kind.
    pub originator_type: String,
    /// Family-specific attributes.
    pub attrs: serde_json::Value,
}

impl EntryInfo {
    /// Build the wire record for an entry.
    #[must_use]
    pub fn from_entry<A: Serialize>(family: DumpFamily, entry: &Entry<A>) -> Self {
        Self {
            id: entry.id,
            object_path: family.entry_path(entry.id),
            status: entry.status,
            start_time_us: entry.start_time_us,
            elapsed_us: entry.elapsed_us,
            completed_time_us: entry.completed_time_us,
            size: entry.size,
            progress: entry.progress,
            offloaded: entry.offloaded,
            offload_uri: entry.offload_uri.clone(),
            file: entry
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            originator_id: entry.originator.id.clone(),
            originator_type: entry.originator.kind.to_string(),
            attrs: serde_json::to_value(&entry.attrs).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Per-family status block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyStatus {
    /// Family tag.
    pub family: DumpFamily,
    /// Catalog size.
    pub entries: usize,
    /// Highest identifier committed.
    pub last_id: u32,
    /// Entries still collecting.
    pub in_progress: usize,
}
