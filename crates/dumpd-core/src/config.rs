//! Daemon configuration.
//!
//! Loaded from a TOML file; every knob has a default so the daemon starts
//! without one. CLI arguments override file values in the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpdConfig {
    /// Unix socket the daemon serves its bus surface on.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Fixed percentage of partition capacity subtracted from available
    /// bytes before free-space checks. Works around log-structured
    /// filesystems (jffs2) overreporting free space.
    #[serde(default = "default_jffs_offset")]
    pub jffs_inaccuracy_percent: u8,

    /// File persisting the set of error-log ids already dumped for.
    #[serde(default = "default_elog_state_file")]
    pub elog_state_file: PathBuf,

    /// BMC dump family.
    #[serde(default)]
    pub bmc: BmcConfig,

    /// System dump family.
    #[serde(default)]
    pub system: SystemConfig,

    /// Fault-log dump family.
    #[serde(default)]
    pub faultlog: FaultLogConfig,

    /// FDR dump family.
    #[serde(default)]
    pub fdr: FdrConfig,
}

impl Default for DumpdConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            jffs_inaccuracy_percent: default_jffs_offset(),
            elog_state_file: default_elog_state_file(),
            bmc: BmcConfig::default(),
            system: SystemConfig::default(),
            faultlog: FaultLogConfig::default(),
            fdr: FdrConfig::default(),
        }
    }
}

impl DumpdConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Quota limits for one family, with the global jffs offset applied.
    #[must_use]
    pub fn limits_for(&self, common: &CommonFamilyConfig) -> FamilyLimits {
        FamilyLimits {
            dump_path: common.dump_path.clone(),
            max_limit: common.max_limit,
            max_size_kb: common.max_size_kb,
            total_size_kb: common.total_size_kb,
            min_space_reqd_kb: common.min_space_reqd_kb,
            rotation: common.rotation,
            max_time_limit: common.max_time_limit,
            jffs_inaccuracy_percent: self.jffs_inaccuracy_percent,
        }
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from("/run/dumpd/dumpd.sock")
}

const fn default_jffs_offset() -> u8 {
    2
}

fn default_elog_state_file() -> PathBuf {
    PathBuf::from("/var/lib/dumpd/elogid")
}

/// Knobs common to every dump family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFamilyConfig {
    /// Whether the family manager is instantiated at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Staging root where collectors deposit artifacts.
    pub dump_path: PathBuf,

    /// Maximum number of catalog entries; 0 disables the count quota.
    pub max_limit: u32,

    /// Upper clamp on the size handed to a single collection, in KB.
    pub max_size_kb: u64,

    /// Byte cap for the whole staging root, in KB.
    pub total_size_kb: u64,

    /// Minimum permitted collection size, in KB. Below this, creation is
    /// rejected (or oldest entries rotated out when rotation is enabled).
    pub min_space_reqd_kb: u64,

    /// Delete oldest entries instead of rejecting when space runs out.
    pub rotation: bool,

    /// Maximum collection time before the collector's process group is
    /// terminated.
    #[serde(default = "default_max_time_limit", with = "humantime_serde")]
    pub max_time_limit: Duration,

    /// Progress-timer period for in-progress entries.
    #[serde(default = "default_progress_interval", with = "humantime_serde")]
    pub progress_interval: Duration,
}

const fn default_true() -> bool {
    true
}

const fn default_max_time_limit() -> Duration {
    // Matches the web-service dump-creation task timeout.
    Duration::from_secs(2700)
}

const fn default_progress_interval() -> Duration {
    Duration::from_secs(60)
}

/// Resolved per-family quota limits consumed by the manager.
#[derive(Debug, Clone)]
pub struct FamilyLimits {
    /// Staging root.
    pub dump_path: PathBuf,
    /// Entry-count quota; 0 disables.
    pub max_limit: u32,
    /// Per-collection size clamp, KB.
    pub max_size_kb: u64,
    /// Staging-root byte cap, KB.
    pub total_size_kb: u64,
    /// Minimum permitted collection size, KB.
    pub min_space_reqd_kb: u64,
    /// Evict oldest entries instead of rejecting.
    pub rotation: bool,
    /// Collection timeout.
    pub max_time_limit: Duration,
    /// Free-space inaccuracy offset, percent of capacity.
    pub jffs_inaccuracy_percent: u8,
}

/// BMC dump family configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmcConfig {
    /// Common family knobs.
    #[serde(flatten)]
    pub common: CommonFamilyConfig,

    /// Separate count quota for application-core entries; 0 disables.
    #[serde(default = "default_bmc_core_max_limit")]
    pub core_max_limit: u32,

    /// Path of the dreport collector.
    #[serde(default = "default_dreport")]
    pub collector: PathBuf,

    /// Optional extra path handed to dreport with `-p`.
    #[serde(default)]
    pub extra_report_path: Option<PathBuf>,
}

impl Default for BmcConfig {
    fn default() -> Self {
        Self {
            common: CommonFamilyConfig {
                enabled: true,
                dump_path: PathBuf::from("/var/lib/dumpd/bmc"),
                max_limit: 20,
                max_size_kb: 200_000,
                total_size_kb: 400_000,
                min_space_reqd_kb: 20_000,
                rotation: false,
                max_time_limit: default_max_time_limit(),
                progress_interval: Duration::from_secs(60),
            },
            core_max_limit: default_bmc_core_max_limit(),
            collector: default_dreport(),
            extra_report_path: None,
        }
    }
}

const fn default_bmc_core_max_limit() -> u32 {
    5
}

fn default_dreport() -> PathBuf {
    PathBuf::from("/usr/bin/dreport")
}

/// System dump family configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Common family knobs.
    #[serde(flatten)]
    pub common: CommonFamilyConfig,

    /// Collector binaries per diagnostic type.
    #[serde(default)]
    pub collectors: SystemCollectors,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            common: CommonFamilyConfig {
                enabled: true,
                dump_path: PathBuf::from("/var/lib/dumpd/system"),
                max_limit: 10,
                max_size_kb: 200_000,
                total_size_kb: 400_000,
                min_space_reqd_kb: 20_000,
                rotation: false,
                max_time_limit: default_max_time_limit(),
                progress_interval: Duration::from_secs(45),
            },
            collectors: SystemCollectors::default(),
        }
    }
}

/// Collector binaries for the system dump family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCollectors {
    /// Fallback dreport collector (no diagnostic type).
    #[serde(default = "default_dreport")]
    pub dreport: PathBuf,
    /// `SelfTest` collector.
    #[serde(default = "default_selftest")]
    pub selftest: PathBuf,
    /// `FPGA` register collector.
    #[serde(default = "default_fpga")]
    pub fpga: PathBuf,
    /// `EROT`/`ROT` collector.
    #[serde(default = "default_erot")]
    pub erot: PathBuf,
    /// Retimer LTSSM collector.
    #[serde(default = "default_ret_ltssm")]
    pub ret_ltssm: PathBuf,
    /// Retimer register collector.
    #[serde(default = "default_ret_register")]
    pub ret_register: PathBuf,
    /// Firmware-attributes collector.
    #[serde(default = "default_fw_atts")]
    pub fw_atts: PathBuf,
    /// Hardware-checkout collector.
    #[serde(default = "default_hwcheckout")]
    pub hwcheckout: PathBuf,
}

impl Default for SystemCollectors {
    fn default() -> Self {
        Self {
            dreport: default_dreport(),
            selftest: default_selftest(),
            fpga: default_fpga(),
            erot: default_erot(),
            ret_ltssm: default_ret_ltssm(),
            ret_register: default_ret_register(),
            fw_atts: default_fw_atts(),
            hwcheckout: default_hwcheckout(),
        }
    }
}

fn default_selftest() -> PathBuf {
    PathBuf::from("/usr/bin/selftest_dump.sh")
}

fn default_fpga() -> PathBuf {
    PathBuf::from("/usr/bin/fpga_dump.sh")
}

fn default_erot() -> PathBuf {
    PathBuf::from("/usr/bin/erot_dump.sh")
}

fn default_ret_ltssm() -> PathBuf {
    PathBuf::from("/usr/bin/retimerLtssmDump.sh")
}

fn default_ret_register() -> PathBuf {
    PathBuf::from("/usr/bin/retimerRegisterDump.sh")
}

fn default_fw_atts() -> PathBuf {
    PathBuf::from("/usr/bin/fw_atts_dump.sh")
}

fn default_hwcheckout() -> PathBuf {
    PathBuf::from("/usr/bin/hwcheckout_dump.sh")
}

/// Fault-log dump family configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultLogConfig {
    /// Common family knobs.
    #[serde(flatten)]
    pub common: CommonFamilyConfig,

    /// CPER ingest collector.
    #[serde(default = "default_cper_collector")]
    pub collector: PathBuf,
}

impl Default for FaultLogConfig {
    fn default() -> Self {
        Self {
            common: CommonFamilyConfig {
                enabled: true,
                dump_path: PathBuf::from("/var/lib/dumpd/faultlog"),
                max_limit: 10,
                max_size_kb: 50_000,
                total_size_kb: 100_000,
                min_space_reqd_kb: 5_000,
                rotation: true,
                max_time_limit: default_max_time_limit(),
                progress_interval: default_progress_interval(),
            },
            collector: default_cper_collector(),
        }
    }
}

fn default_cper_collector() -> PathBuf {
    PathBuf::from("/usr/bin/cper_dump.sh")
}

/// FDR dump family configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdrConfig {
    /// Common family knobs.
    #[serde(flatten)]
    pub common: CommonFamilyConfig,

    /// FDR collector binary.
    #[serde(default = "default_fdr_collector")]
    pub collector: PathBuf,
}

impl Default for FdrConfig {
    fn default() -> Self {
        Self {
            common: CommonFamilyConfig {
                enabled: true,
                dump_path: PathBuf::from("/var/lib/dumpd/fdr"),
                max_limit: 5,
                max_size_kb: 200_000,
                total_size_kb: 400_000,
                min_space_reqd_kb: 20_000,
                rotation: false,
                max_time_limit: default_max_time_limit(),
                progress_interval: default_progress_interval(),
            },
            collector: default_fdr_collector(),
        }
    }
}

fn default_fdr_collector() -> PathBuf {
    PathBuf::from("/usr/bin/fdr_dump.sh")
}
