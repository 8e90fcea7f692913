//! Dump entry model.
//!
//! An [`Entry`] is the per-artifact record published on the bus: identity,
//! timestamps, size, status, originator, and the family-specific attribute
//! block `A`. Families stay parameterized rather than virtually dispatched;
//! the manager owns a catalog of `Entry<A>` for its own attribute type.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DumpError;

/// Microseconds per second, for epoch conversions.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Dump families managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFamily {
    /// General BMC dumps collected by dreport.
    Bmc,
    /// System/platform dumps selected by diagnostic type.
    System,
    /// Fault-log records decoded from CPER error records.
    FaultLog,
    /// Field-data-request bundles.
    Fdr,
}

impl DumpFamily {
    /// Short name used in object paths and logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bmc => "bmc",
            Self::System => "system",
            Self::FaultLog => "faultlog",
            Self::Fdr => "fdr",
        }
    }

    /// Object path of an entry of this family.
    #[must_use]
    pub fn entry_path(self, id: u32) -> String {
        format!("/dump/{}/entry/{id}", self.name())
    }
}

impl std::fmt::Display for DumpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DumpFamily {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bmc" => Ok(Self::Bmc),
            "system" => Ok(Self::System),
            "faultlog" => Ok(Self::FaultLog),
            "fdr" => Ok(Self::Fdr),
            other => Err(DumpError::invalid_argument("family", other)),
        }
    }
}

/// Operation status of a dump entry.
///
/// Terminal states are `Completed` and `Failed`; only `InProgress` may
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The collector is still producing the payload.
    InProgress,
    /// The payload landed and the entry is final.
    Completed,
    /// The collector failed before producing a payload.
    Failed,
}

impl OperationStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of requester that asked for a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginatorType {
    /// An external management client.
    #[default]
    Client,
    /// The engine itself (for example the error-log watcher).
    Internal,
    /// Another management service on the host.
    SupportingService,
}

impl std::str::FromStr for OriginatorType {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Client" => Ok(Self::Client),
            "Internal" => Ok(Self::Internal),
            "SupportingService" => Ok(Self::SupportingService),
            other => Err(DumpError::invalid_argument("OriginatorType", other)),
        }
    }
}

impl std::fmt::Display for OriginatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "Client"),
            Self::Internal => write!(f, "Internal"),
            Self::SupportingService => write!(f, "SupportingService"),
        }
    }
}

/// Identity of the requester of a dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Originator {
    /// Free-form identifier supplied by the requester.
    pub id: String,
    /// Kind of requester.
    pub kind: OriginatorType,
}

impl Originator {
    /// Originator for engine-internal dump requests.
    #[must_use]
    pub fn internal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: OriginatorType::Internal,
        }
    }
}

/// Per-artifact dump record.
///
/// `A` is the family-specific attribute block (serialized alongside the base
/// fields in the sidecar document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry<A> {
    /// Entry identifier, unique within the family, never reused.
    pub id: u32,

    /// Creation time, microseconds since the epoch. Never mutated.
    pub start_time_us: u64,

    /// Time of the most recent progress marker, microseconds since the epoch.
    pub elapsed_us: u64,

    /// Completion time, microseconds since the epoch; 0 while non-terminal.
    pub completed_time_us: u64,

    /// Payload size in bytes; 0 while non-terminal.
    pub size: u64,

    /// Operation status.
    pub status: OperationStatus,

    /// Collection progress, 0..=100. Non-decreasing while in progress.
    pub progress: u8,

    /// Whether an offload has been accepted for this entry.
    pub offloaded: bool,

    /// URI handed to the offload subsystem; empty unless offload initiated.
    pub offload_uri: String,

    /// Absolute path of the payload; `None` until the collector produced it.
    pub file: Option<PathBuf>,

    /// Requester identity.
    pub originator: Originator,

    /// Family-specific attributes.
    pub attrs: A,
}

impl<A> Entry<A> {
    /// New in-progress entry, born from a `CreateDump` request.
    #[must_use]
    pub fn new_in_progress(id: u32, now_us: u64, originator: Originator, attrs: A) -> Self {
        Self {
            id,
            start_time_us: now_us,
            elapsed_us: 0,
            completed_time_us: 0,
            size: 0,
            status: OperationStatus::InProgress,
            progress: 0,
            offloaded: false,
            offload_uri: String::new(),
            file: None,
            originator,
            attrs,
        }
    }

    /// New completed entry, born from an on-disk payload during restore.
    #[must_use]
    pub fn new_completed(
        id: u32,
        timestamp_us: u64,
        size: u64,
        file: PathBuf,
        originator: Originator,
        attrs: A,
    ) -> Self {
        Self {
            id,
            start_time_us: timestamp_us,
            elapsed_us: timestamp_us,
            completed_time_us: timestamp_us,
            size,
            status: OperationStatus::Completed,
            progress: 100,
            offloaded: false,
            offload_uri: String::new(),
            file: Some(file),
            originator,
            attrs,
        }
    }

    /// Transition to `Completed` once the payload has landed.
    ///
    /// Invoked from the watcher callback; records the payload timestamp,
    /// size, and path, and pins progress at 100.
    pub fn update(&mut self, timestamp_us: u64, size: u64, file: PathBuf) {
        self.elapsed_us = timestamp_us;
        self.completed_time_us = timestamp_us;
        self.size = size;
        self.file = Some(file);
        self.status = OperationStatus::Completed;
        self.progress = 100;
    }

    /// Transition to `Failed` after a non-zero collector exit.
    ///
    /// The entry stays in the catalog for introspection.
    pub fn set_failed(&mut self) {
        self.status = OperationStatus::Failed;
        self.progress = 100;
    }

    /// Record an accepted offload request.
    pub fn initiate_offload(&mut self, uri: String) {
        self.offload_uri = uri;
        self.offloaded = true;
    }

    /// Advance the time-based progress estimate.
    ///
    /// `progress = 100 * (1 - remaining / limit)`, clamped to 100 past the
    /// collection limit and kept non-decreasing. Returns `true` once the
    /// entry is past its limit.
    pub fn progress_tick(&mut self, now_us: u64, limit: Duration) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let limit_us = self.start_time_us.saturating_add(limit.as_micros() as u64);
        let pct = if now_us >= limit_us {
            100
        } else {
            let remaining = limit_us - now_us;
            let limit_total = limit.as_micros() as u64;
            (100 - remaining.saturating_mul(100) / limit_total.max(1)) as u8
        };
        self.progress = self.progress.max(pct);
        self.elapsed_us = now_us;
        now_us > limit_us
    }

    /// Open a read-only handle to the payload file.
    ///
    /// # Errors
    ///
    /// [`DumpError::NoFile`] if the collector has not produced a payload,
    /// [`DumpError::Open`] if the file cannot be opened.
    pub fn file_handle(&self) -> Result<File, DumpError> {
        let path = self.file.as_deref().ok_or(DumpError::NoFile)?;
        File::open(path).map_err(|e| DumpError::Open(format!("{}: {e}", path.display())))
    }

    /// Directory holding the payload, when known.
    #[must_use]
    pub fn payload_dir(&self) -> Option<&Path> {
        self.file.as_deref().and_then(Path::parent)
    }
}

impl<A: Serialize + DeserializeOwned> Entry<A> {
    /// Overlay restorable attributes from a previously serialized record.
    ///
    /// Timestamps, originator, offload state, and the family attribute block
    /// come from the sidecar; identity, size, file path, and status stay as
    /// derived from the on-disk payload.
    pub fn absorb_serialized(&mut self, saved: Entry<A>) {
        self.start_time_us = saved.start_time_us;
        self.elapsed_us = saved.elapsed_us;
        self.completed_time_us = saved.completed_time_us;
        self.originator = saved.originator;
        self.offloaded = saved.offloaded;
        self.offload_uri = saved.offload_uri;
        self.attrs = saved.attrs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry<()> {
        Entry::new_in_progress(1, 1_700_000_000 * MICROS_PER_SEC, Originator::default(), ())
    }

    #[test]
    fn test_new_in_progress_defaults() {
        let e = entry();
        assert_eq!(e.status, OperationStatus::InProgress);
        assert_eq!(e.completed_time_us, 0);
        assert_eq!(e.elapsed_us, 0);
        assert_eq!(e.size, 0);
        assert_eq!(e.progress, 0);
        assert!(e.file.is_none());
    }

    #[test]
    fn test_new_completed_shares_timestamps() {
        let ts = 1_700_000_000 * MICROS_PER_SEC;
        let e = Entry::new_completed(
            3,
            ts,
            4096,
            PathBuf::from("/tmp/obmcdump_3_1700000000.tar.xz"),
            Originator::default(),
            (),
        );
        assert_eq!(e.start_time_us, ts);
        assert_eq!(e.elapsed_us, ts);
        assert_eq!(e.completed_time_us, ts);
        assert_eq!(e.progress, 100);
        assert!(e.status.is_terminal());
    }

    #[test]
    fn test_update_completes_entry() {
        let mut e = entry();
        let ts = e.start_time_us + 30 * MICROS_PER_SEC;
        e.update(ts, 4096, PathBuf::from("/tmp/obmcdump_1_1700000030.tar.xz"));
        assert_eq!(e.status, OperationStatus::Completed);
        assert_eq!(e.size, 4096);
        assert_eq!(e.completed_time_us, ts);
        assert_eq!(e.progress, 100);
    }

    #[test]
    fn test_set_failed_pins_progress() {
        let mut e = entry();
        e.set_failed();
        assert_eq!(e.status, OperationStatus::Failed);
        assert_eq!(e.progress, 100);
    }

    #[test]
    fn test_progress_is_non_decreasing() {
        let mut e = entry();
        let limit = Duration::from_secs(2700);
        let past = e.progress_tick(e.start_time_us + 1350 * MICROS_PER_SEC, limit);
        assert!(!past);
        assert_eq!(e.progress, 50);

        // A tick with an earlier clock must not move progress backwards.
        e.progress_tick(e.start_time_us + 1000 * MICROS_PER_SEC, limit);
        assert_eq!(e.progress, 50);
    }

    #[test]
    fn test_progress_past_limit_reports_timeout() {
        let mut e = entry();
        let limit = Duration::from_secs(2700);
        let past = e.progress_tick(e.start_time_us + 3000 * MICROS_PER_SEC, limit);
        assert!(past);
        assert_eq!(e.progress, 100);
    }

    #[test]
    fn test_file_handle_requires_payload() {
        let e = entry();
        assert!(matches!(e.file_handle(), Err(DumpError::NoFile)));
    }

    #[test]
    fn test_entry_path_shape() {
        assert_eq!(DumpFamily::Bmc.entry_path(1), "/dump/bmc/entry/1");
        assert_eq!(DumpFamily::FaultLog.entry_path(7), "/dump/faultlog/entry/7");
    }

    #[test]
    fn test_originator_type_round_trip() {
        for s in ["Client", "Internal", "SupportingService"] {
            let parsed: OriginatorType = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("Nobody".parse::<OriginatorType>().is_err());
    }
}
