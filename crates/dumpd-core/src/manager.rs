//! Generic dump family manager.
//!
//! One [`FamilyManager`] per dump family owns the ordered catalog, the
//! staging directory, creation and restore logic, the eviction policies, and
//! failure routing. Family-specific behavior (parameter validation, argument
//! vectors, attribute blocks, quota buckets) lives in a [`FamilyPolicy`]
//! implementation; the manager itself is family-agnostic.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use nix::sys::statvfs::statvfs;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::collector::{CollectorCommand, ExitInfo, SpawnedCollector};
use crate::config::FamilyLimits;
use crate::entry::{DumpFamily, Entry, Originator, MICROS_PER_SEC};
use crate::error::DumpError;
use crate::serial;
use crate::watch::{WatchEvent, WatchKind};

/// Parameter key naming the requester.
pub const PARAM_ORIGINATOR_ID: &str = "OriginatorId";

/// Parameter key naming the requester kind.
pub const PARAM_ORIGINATOR_TYPE: &str = "OriginatorType";

/// Validated `CreateDump` parameter map.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    map: BTreeMap<String, String>,
}

impl CreateParams {
    /// Wrap a raw parameter map.
    #[must_use]
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self { map }
    }

    /// Look up a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Parse the originator pair, defaulting when absent.
    ///
    /// # Errors
    ///
    /// [`DumpError::InvalidArgument`] when `OriginatorType` is not a known
    /// kind.
    pub fn originator(&self) -> Result<Originator, DumpError> {
        let id = self.get(PARAM_ORIGINATOR_ID).unwrap_or_default().to_string();
        let kind = match self.get(PARAM_ORIGINATOR_TYPE) {
            Some(raw) => raw.parse()?,
            None => Default::default(),
        };
        Ok(Originator { id, kind })
    }

    /// Warn about keys the family does not recognize. Unrecognized keys are
    /// ignored, not rejected.
    pub fn warn_unrecognized(&self, family: DumpFamily, recognized: &[&str]) {
        for key in self.map.keys() {
            let known = key == PARAM_ORIGINATOR_ID
                || key == PARAM_ORIGINATOR_TYPE
                || recognized.contains(&key.as_str());
            if !known {
                warn!(family = %family, key, "ignoring unrecognized dump parameter");
            }
        }
    }
}

impl From<BTreeMap<String, String>> for CreateParams {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::new(map)
    }
}

/// Identity and timestamp parsed from a payload file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpFileName {
    /// Entry identifier.
    pub id: u32,
    /// Payload timestamp, seconds since the epoch.
    pub epoch_s: u64,
}

/// Parse the `obmcdump_<id>_<epoch>.<ext>` payload file name grammar.
#[must_use]
pub fn parse_dump_file_name(name: &str) -> Option<DumpFileName> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| Regex::new(r"obmcdump_([0-9]+)_([0-9]+)\.([a-zA-Z0-9]+)").unwrap());
    let caps = re.captures(name)?;
    Some(DumpFileName {
        id: caps[1].parse().ok()?,
        epoch_s: caps[2].parse().ok()?,
    })
}

/// One entry-count quota bucket.
///
/// Eviction removes oldest entries only from the bucket that is exceeded.
pub struct QuotaBucket<A> {
    /// Maximum entries in the bucket; 0 disables the quota.
    pub limit: u32,
    /// Which entries count against the bucket.
    pub matches: fn(&A) -> bool,
}

/// Context handed to [`FamilyPolicy::plan`].
#[derive(Debug)]
pub struct PlanContext<'a> {
    /// The family's staging root.
    pub staging: &'a Path,
    /// Identifier the collection will commit if it goes ahead.
    pub next_id: u32,
    /// Size permitted for this collection, in KB.
    pub allowed_size_kb: u64,
}

/// A validated collection about to be launched.
#[derive(Debug)]
pub struct CollectionPlan<A> {
    /// Collector invocation.
    pub command: CollectorCommand,
    /// Attribute block for the new entry.
    pub attrs: A,
    /// Whether the request adds a catalog entry (`false` for maintenance
    /// actions that only run the collector).
    pub produces_entry: bool,
}

/// Family-specific behavior plugged into [`FamilyManager`].
pub trait FamilyPolicy: Send + Sync + 'static {
    /// Family-specific attribute block carried by each entry.
    type Attrs: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Extra creation input not expressible as bus parameters (used by
    /// engine-internal requesters). `Default` is the bus path.
    type CreateHint: Default + Send;

    /// Which family this policy implements.
    fn family(&self) -> DumpFamily;

    /// Parameter keys the family understands beyond the originator pair.
    fn recognized_params(&self) -> &'static [&'static str];

    /// Validate parameters and produce a collection plan. Must not have
    /// side effects on failure.
    ///
    /// # Errors
    ///
    /// Any [`DumpError`] surfaced to the caller; nothing has been spawned
    /// or committed yet.
    fn plan(
        &mut self,
        params: &CreateParams,
        hint: Self::CreateHint,
        ctx: &PlanContext<'_>,
    ) -> Result<CollectionPlan<Self::Attrs>, DumpError>;

    /// Attribute block for an entry rebuilt from an on-disk payload.
    fn restored_attrs(&self, payload: &Path) -> Self::Attrs;

    /// Directory holding an entry's artifacts.
    fn entry_dir(&self, staging: &Path, id: u32, _attrs: &Self::Attrs) -> PathBuf {
        staging.join(id.to_string())
    }

    /// Record the spawned collector's process group in the attribute block.
    fn record_spawn(&self, _attrs: &mut Self::Attrs, _pgid: i32) {}

    /// Forget a previously recorded process group.
    fn clear_process_group(&self, _attrs: &mut Self::Attrs) {}

    /// Process group recorded for the entry, or 0.
    fn process_group(&self, _attrs: &Self::Attrs) -> i32 {
        0
    }

    /// Called once a collection has been committed under `id`.
    fn on_spawned(&mut self, _id: u32, _attrs: &Self::Attrs) {}

    /// Enrich an entry from its freshly landed payload.
    fn on_payload(&self, _entry: &mut Entry<Self::Attrs>, _dump_dir: &Path) {}

    /// Called when an entry transitions to a terminal state.
    fn on_terminal(&mut self, _entry: &Entry<Self::Attrs>) {}

    /// Called when the collector child for `id` has exited.
    fn on_child_exit(&mut self, _id: u32) {}

    /// Entry-count quota buckets. The default is a single bucket over the
    /// whole catalog.
    fn buckets(&self, max_limit: u32) -> Vec<QuotaBucket<Self::Attrs>> {
        vec![QuotaBucket {
            limit: max_limit,
            matches: |_| true,
        }]
    }

    /// Directories scanned during restore.
    fn restore_roots(&self, staging: &Path) -> Vec<PathBuf> {
        vec![staging.to_path_buf()]
    }

    /// Whether restore creates one entry per regular file instead of one
    /// per directory.
    fn restore_per_file(&self) -> bool {
        false
    }

    /// Progress-timer period, or `None` when the family reports none.
    fn progress_interval(&self) -> Option<Duration> {
        None
    }
}

/// Result of a successful `CreateDump`.
#[derive(Debug)]
pub struct CreatedDump {
    /// Committed identifier.
    pub id: u32,
    /// Object path of the new entry; `None` for action-only requests.
    pub object_path: Option<String>,
    /// The running collector, to be supervised by the caller.
    pub collector: SpawnedCollector,
}

/// Per-family dump manager.
pub struct FamilyManager<P: FamilyPolicy> {
    policy: P,
    limits: FamilyLimits,
    catalog: Catalog<P::Attrs>,
    last_id: u32,
    restoring: bool,
}

impl<P: FamilyPolicy> FamilyManager<P> {
    /// Construct a manager over its staging root, creating the root if
    /// needed.
    ///
    /// # Errors
    ///
    /// [`DumpError::Internal`] when the staging root cannot be created.
    pub fn new(policy: P, limits: FamilyLimits) -> Result<Self, DumpError> {
        std::fs::create_dir_all(&limits.dump_path).map_err(|e| {
            DumpError::Internal(format!("create {}: {e}", limits.dump_path.display()))
        })?;
        Ok(Self {
            policy,
            limits,
            catalog: Catalog::new(),
            last_id: 0,
            restoring: false,
        })
    }

    /// The family this manager serves.
    #[must_use]
    pub fn family(&self) -> DumpFamily {
        self.policy.family()
    }

    /// The staging root.
    #[must_use]
    pub fn staging(&self) -> &Path {
        &self.limits.dump_path
    }

    /// Read access to the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog<P::Attrs> {
        &self.catalog
    }

    /// Highest identifier committed so far.
    #[must_use]
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    /// Read access to the policy.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to the policy.
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Progress-timer period for this family, if any.
    #[must_use]
    pub fn progress_interval(&self) -> Option<Duration> {
        self.policy.progress_interval()
    }

    /// Handle a `CreateDump` request from the bus.
    ///
    /// # Errors
    ///
    /// See [`FamilyManager::create_dump_with`].
    pub fn create_dump(&mut self, params: &CreateParams) -> Result<CreatedDump, DumpError> {
        self.create_dump_with(params, P::CreateHint::default())
    }

    /// Handle a creation request with an engine-internal hint.
    ///
    /// Validates parameters, enforces quotas (evicting oldest entries where
    /// rotation allows), launches the family collector in its own process
    /// group, commits the next identifier, and inserts an in-progress entry.
    ///
    /// # Errors
    ///
    /// - [`DumpError::InvalidArgument`] for malformed family parameters.
    /// - [`DumpError::Unavailable`] when a mutually-exclusive collection is
    ///   in flight.
    /// - [`DumpError::QuotaExceeded`] when the byte cap is reached and
    ///   rotation is disabled.
    /// - [`DumpError::Internal`] for spawn failures.
    pub fn create_dump_with(
        &mut self,
        params: &CreateParams,
        hint: P::CreateHint,
    ) -> Result<CreatedDump, DumpError> {
        let originator = params.originator()?;
        params.warn_unrecognized(self.family(), self.policy.recognized_params());

        self.enforce_count_quota();
        let allowed_size_kb = self.allowed_size_kb()?;

        let next_id = self.last_id + 1;
        let plan = {
            let ctx = PlanContext {
                staging: &self.limits.dump_path,
                next_id,
                allowed_size_kb,
            };
            self.policy.plan(params, hint, &ctx)?
        };

        let collector = plan.command.spawn_in_own_group()?;
        self.last_id = next_id;

        let mut attrs = plan.attrs;
        self.policy.record_spawn(&mut attrs, collector.pgid);
        self.policy.on_spawned(next_id, &attrs);

        if !plan.produces_entry {
            info!(
                family = %self.family(),
                id = next_id,
                "collector action started without a catalog entry"
            );
            return Ok(CreatedDump {
                id: next_id,
                object_path: None,
                collector,
            });
        }

        let entry = Entry::new_in_progress(next_id, now_us(), originator, attrs);
        let object_path = self.family().entry_path(next_id);
        self.catalog.insert(entry);

        info!(family = %self.family(), id = next_id, path = %object_path, "dump collection started");

        Ok(CreatedDump {
            id: next_id,
            object_path: Some(object_path),
            collector,
        })
    }

    /// Watcher callback: route payload completions into the catalog.
    pub fn handle_watch_events(&mut self, events: &[WatchEvent]) {
        for event in events {
            if event.kind == WatchKind::CompletedWrite {
                self.create_entry(&event.path);
            }
        }
    }

    /// Absorb a payload file into the catalog.
    ///
    /// A file name outside the payload grammar is logged and ignored. An
    /// existing in-progress entry transitions to `Completed`; a second
    /// delivery for a terminal entry is a no-op. Unknown identifiers create
    /// a completed entry only during restore; at runtime they are stale
    /// files from deleted entries and are left for the next restore to
    /// sweep.
    pub fn create_entry(&mut self, file: &Path) {
        let family = self.policy.family();
        let name = file.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let Some(parsed) = parse_dump_file_name(&name) else {
            warn!(family = %family, file = %name, "invalid dump file name");
            return;
        };

        let size = match std::fs::metadata(file) {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!(family = %family, file = %file.display(), error = %e,
                       "failed to stat dump payload");
                return;
            },
        };
        let timestamp_us = parsed.epoch_s * MICROS_PER_SEC;
        let dump_dir = file.parent().map(Path::to_path_buf);

        let mut completed = false;
        if let Some(entry) = self.catalog.get_mut(parsed.id) {
            if entry.status.is_terminal() {
                debug!(family = %family, id = parsed.id,
                       "duplicate payload notification for terminal entry");
                return;
            }
            entry.update(timestamp_us, size, file.to_path_buf());
            self.policy.clear_process_group(&mut entry.attrs);
            if let Some(dir) = &dump_dir {
                self.policy.on_payload(entry, dir);
                if let Err(e) = serial::store(dir, entry) {
                    error!(family = %family, id = parsed.id, error = %e,
                           "failed to serialize dump entry");
                }
            }
            completed = true;
        }
        if completed {
            if let Some(entry) = self.catalog.get(parsed.id) {
                self.policy.on_terminal(entry);
            }
            info!(family = %family, id = parsed.id, size, "dump completed");
            return;
        }

        if !self.restoring {
            warn!(family = %family, id = parsed.id, file = %file.display(),
                  "payload for unknown entry; leaving for the next restore to sweep");
            return;
        }

        self.last_id = self.last_id.max(parsed.id);
        let mut entry = Entry::new_completed(
            parsed.id,
            timestamp_us,
            size,
            file.to_path_buf(),
            Originator::default(),
            self.policy.restored_attrs(file),
        );
        if let Some(dir) = &dump_dir {
            self.policy.on_payload(&mut entry, dir);
            match serial::load(dir) {
                Ok(Some(saved)) => entry.absorb_serialized(saved),
                Ok(None) => {},
                Err(e) => {
                    error!(family = %family, id = parsed.id, error = %e,
                           "failed to read dump entry sidecar");
                },
            }
        }
        debug!(family = %family, id = entry.id, size, "restored dump entry");
        self.catalog.insert(entry);
    }

    /// Route a collector exit to the owning entry.
    ///
    /// A non-zero status marks the entry `Failed`; the entry stays in the
    /// catalog for introspection.
    pub fn child_exited(&mut self, id: u32, info: ExitInfo) {
        if info.is_clean() {
            if let Some(entry) = self.catalog.get_mut(id) {
                self.policy.clear_process_group(&mut entry.attrs);
            }
        } else {
            error!(
                family = %self.family(),
                id,
                status = %info,
                "dump collector failed"
            );
            self.create_dump_failed(id);
        }
        self.policy.on_child_exit(id);
    }

    /// Mark the entry for a failed collection.
    pub fn create_dump_failed(&mut self, id: u32) {
        if let Some(entry) = self.catalog.get_mut(id) {
            if !entry.status.is_terminal() {
                entry.set_failed();
                self.policy.clear_process_group(&mut entry.attrs);
            }
        }
        if let Some(entry) = self.catalog.get(id) {
            self.policy.on_terminal(entry);
        }
    }

    /// Rebuild the catalog from on-disk state.
    ///
    /// Scans the restore roots for pure-decimal directories, advances the
    /// identifier counter past every id observed, and creates a completed
    /// entry per payload found. Filesystem problems are logged; restore
    /// continues with the remaining artifacts.
    pub fn restore(&mut self) {
        self.restoring = true;
        for root in self.policy.restore_roots(&self.limits.dump_path) {
            self.restore_root(&root);
        }
        self.restoring = false;
        info!(
            family = %self.family(),
            entries = self.catalog.len(),
            last_id = self.last_id,
            "restore complete"
        );
    }

    fn restore_root(&mut self, root: &Path) {
        let iter = match std::fs::read_dir(root) {
            Ok(iter) => iter,
            Err(e) => {
                if root.exists() {
                    error!(root = %root.display(), error = %e, "failed to scan staging root");
                }
                return;
            },
        };

        for dir in iter.flatten() {
            let name = dir.file_name();
            let Some(id) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if !dir.path().is_dir() {
                continue;
            }
            self.last_id = self.last_id.max(id);

            let files = match std::fs::read_dir(dir.path()) {
                Ok(iter) => iter,
                Err(e) => {
                    error!(dir = %dir.path().display(), error = %e, "failed to scan dump directory");
                    continue;
                },
            };
            for file in files.flatten() {
                if !file.path().is_file() {
                    continue;
                }
                self.create_entry(&file.path());
                if !self.policy.restore_per_file() {
                    break;
                }
            }
        }
    }

    /// Advance progress on every in-progress entry and terminate collectors
    /// past the family's collection limit.
    pub fn progress_tick(&mut self) {
        let now = now_us();
        let limit = self.limits.max_time_limit;
        let family = self.policy.family();
        for entry in self.catalog.iter_mut() {
            if entry.status.is_terminal() {
                continue;
            }
            let past_timeout = entry.progress_tick(now, limit);
            if !past_timeout {
                continue;
            }
            let pgid = self.policy.process_group(&entry.attrs);
            if pgid > 0 {
                error!(family = %family, id = entry.id, pgid, "collection timed out, terminating process group");
                crate::collector::terminate_group(pgid);
                self.policy.clear_process_group(&mut entry.attrs);
            }
        }
    }

    /// Delete an entry: best-effort removal of its backing directory, then
    /// unconditional removal from the catalog.
    ///
    /// # Errors
    ///
    /// [`DumpError::NotFound`] when no such entry exists. Filesystem errors
    /// are logged, not surfaced; the next restore reconciles the disk.
    pub fn delete_entry(&mut self, id: u32) -> Result<(), DumpError> {
        let dir = {
            let entry = self.catalog.get(id).ok_or(DumpError::NotFound(id))?;
            entry.payload_dir().map_or_else(
                || self.policy.entry_dir(&self.limits.dump_path, id, &entry.attrs),
                Path::to_path_buf,
            )
        };

        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                error!(family = %self.family(), id, dir = %dir.display(), error = %e,
                       "failed to remove dump directory");
            }
        }

        self.catalog.remove(id);
        info!(family = %self.family(), id, "dump entry deleted");
        Ok(())
    }

    /// Record an offload request for an entry and persist it.
    ///
    /// # Errors
    ///
    /// [`DumpError::NotFound`] when no such entry exists.
    pub fn initiate_offload(&mut self, id: u32, uri: String) -> Result<(), DumpError> {
        let family = self.policy.family();
        let entry = self.catalog.get_mut(id).ok_or(DumpError::NotFound(id))?;
        entry.initiate_offload(uri);
        info!(family = %family, id, uri = %entry.offload_uri, "offload requested");
        if let Some(dir) = entry.payload_dir().map(Path::to_path_buf) {
            if let Err(e) = serial::store(&dir, entry) {
                error!(family = %family, id, error = %e,
                       "failed to serialize dump entry after offload");
            }
        }
        Ok(())
    }

    /// Open a read-only handle to an entry's payload.
    ///
    /// # Errors
    ///
    /// [`DumpError::NotFound`], [`DumpError::NoFile`], or
    /// [`DumpError::Open`].
    pub fn file_handle(&self, id: u32) -> Result<File, DumpError> {
        self.catalog
            .get(id)
            .ok_or(DumpError::NotFound(id))?
            .file_handle()
    }

    fn enforce_count_quota(&mut self) {
        let buckets = self.policy.buckets(self.limits.max_limit);
        for bucket in buckets {
            if bucket.limit == 0 {
                continue;
            }
            let matches = bucket.matches;
            let total = self.catalog.iter().filter(|e| matches(&e.attrs)).count();
            let limit = bucket.limit as usize;
            if total < limit {
                continue;
            }
            let excess = total - (limit - 1);
            let victims = self.catalog.oldest_matching(excess, |e| matches(&e.attrs));
            for id in victims {
                warn!(family = %self.family(), id, "evicting oldest dump to honor entry limit");
                let _ = self.delete_entry(id);
            }
        }
    }

    /// Size permitted for the next collection, in KB.
    ///
    /// Starts from the byte cap minus current usage, bounded by the
    /// partition's free space less the configured inaccuracy offset. When
    /// the result falls below the minimum required space, oldest entries
    /// are rotated out (if the family allows) or the request is rejected.
    fn allowed_size_kb(&mut self) -> Result<u64, DumpError> {
        loop {
            let permitted = self.permitted_kb()?;
            if permitted >= self.limits.min_space_reqd_kb {
                return Ok(permitted.min(self.limits.max_size_kb));
            }
            if !self.limits.rotation {
                return Err(DumpError::quota_exceeded());
            }
            let Some(victim) = self.catalog.oldest() else {
                return Err(DumpError::quota_exceeded());
            };
            warn!(family = %self.family(), id = victim,
                  "not enough space, rotating out oldest dump");
            self.delete_entry(victim)?;
        }
    }

    fn permitted_kb(&self) -> Result<u64, DumpError> {
        let usage_kb = dir_usage_kb(&self.limits.dump_path);
        let quota_left = self.limits.total_size_kb.saturating_sub(usage_kb);

        let stat = statvfs(&self.limits.dump_path)
            .map_err(|e| DumpError::Internal(format!("statvfs failed: {e}")))?;
        let frsize = stat.fragment_size() as u64;
        let capacity = stat.blocks() as u64 * frsize;
        let available = stat.blocks_available() as u64 * frsize;
        let offset = capacity / 100 * u64::from(self.limits.jffs_inaccuracy_percent);
        let fs_left_kb = available.saturating_sub(offset) / 1024;

        Ok(quota_left.min(fs_left_kb))
    }
}

/// Recursive staging usage in KB, ceiling division per file.
fn dir_usage_kb(root: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(iter) = std::fs::read_dir(&dir) else {
            continue;
        };
        for item in iter.flatten() {
            let path = item.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(meta) = item.metadata() {
                total += meta.len().div_ceil(1024);
            }
        }
    }
    total
}

fn now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dump_file_name() {
        let parsed = parse_dump_file_name("obmcdump_12_1700000000.tar.xz").unwrap();
        assert_eq!(parsed.id, 12);
        assert_eq!(parsed.epoch_s, 1_700_000_000);

        assert!(parse_dump_file_name("obmcdump_12.tar.xz").is_none());
        assert!(parse_dump_file_name("notadump_1_2.bin").is_none());
        assert!(parse_dump_file_name("serialized_entry.json").is_none());
    }

    #[test]
    fn test_originator_parsing() {
        let mut map = BTreeMap::new();
        map.insert(PARAM_ORIGINATOR_ID.to_string(), "client-7".to_string());
        map.insert(
            PARAM_ORIGINATOR_TYPE.to_string(),
            "SupportingService".to_string(),
        );
        let params = CreateParams::new(map);
        let originator = params.originator().unwrap();
        assert_eq!(originator.id, "client-7");
        assert_eq!(
            originator.kind,
            crate::entry::OriginatorType::SupportingService
        );
    }

    #[test]
    fn test_originator_rejects_unknown_kind() {
        let mut map = BTreeMap::new();
        map.insert(PARAM_ORIGINATOR_TYPE.to_string(), "Robot".to_string());
        let params = CreateParams::new(map);
        assert!(matches!(
            params.originator(),
            Err(DumpError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_dir_usage_rounds_up_per_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 1]).unwrap();
        std::fs::write(dir.path().join("b"), vec![0u8; 1025]).unwrap();
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("c"), vec![0u8; 2048]).unwrap();

        assert_eq!(dir_usage_kb(dir.path()), 1 + 2 + 2);
    }
}
