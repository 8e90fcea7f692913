//! System dump family.
//!
//! Platform dumps whose collector is selected by a `DiagnosticType`
//! parameter. At most one collection per diagnostic type runs at a time,
//! and the two retimer collections exclude each other. A retimer-LTSSM
//! collection additionally flips the retimer debug-mode singleton on until
//! its entry reaches a terminal state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::{dreport_args, CollectorCommand};
use crate::config::{SystemCollectors, SystemConfig};
use crate::entry::{DumpFamily, Entry};
use crate::error::DumpError;
use crate::manager::{CollectionPlan, CreateParams, FamilyPolicy, PlanContext};
use crate::retimer::RetimerDebugMode;

/// Diagnostic type selecting the system collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticType {
    /// Device self-test report.
    SelfTest,
    /// FPGA register dump.
    Fpga,
    /// External root-of-trust dump.
    Erot,
    /// Root-of-trust dump.
    Rot,
    /// Retimer LTSSM capture.
    RetLtssm,
    /// Retimer register capture.
    RetRegister,
    /// Firmware attribute report.
    FirmwareAttributes,
    /// Hardware checkout report.
    HardwareCheckout,
}

impl std::str::FromStr for DiagnosticType {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SelfTest" => Ok(Self::SelfTest),
            "FPGA" => Ok(Self::Fpga),
            "EROT" => Ok(Self::Erot),
            "ROT" => Ok(Self::Rot),
            "RetLTSSM" => Ok(Self::RetLtssm),
            "RetRegister" => Ok(Self::RetRegister),
            "FirmwareAttributes" => Ok(Self::FirmwareAttributes),
            "HardwareCheckout" => Ok(Self::HardwareCheckout),
            other => Err(DumpError::invalid_argument("DiagnosticType", other)),
        }
    }
}

impl std::fmt::Display for DiagnosticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SelfTest => "SelfTest",
            Self::Fpga => "FPGA",
            Self::Erot => "EROT",
            Self::Rot => "ROT",
            Self::RetLtssm => "RetLTSSM",
            Self::RetRegister => "RetRegister",
            Self::FirmwareAttributes => "FirmwareAttributes",
            Self::HardwareCheckout => "HardwareCheckout",
        };
        f.write_str(s)
    }
}

/// Family-specific attributes of a system dump entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemAttrs {
    /// Diagnostic type; `None` for the plain dreport path.
    pub diagnostic_type: Option<DiagnosticType>,
    /// Collector process group while in progress; 0 otherwise. Not
    /// persisted.
    #[serde(skip)]
    pub process_group: i32,
}

/// Policy for the system dump family.
pub struct SystemPolicy {
    collectors: SystemCollectors,
    progress_interval: Duration,
    in_flight: BTreeMap<u32, DiagnosticType>,
    retimer: RetimerDebugMode,
}

impl SystemPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn new(cfg: &SystemConfig) -> Self {
        Self {
            collectors: cfg.collectors.clone(),
            progress_interval: cfg.common.progress_interval,
            in_flight: BTreeMap::new(),
            retimer: RetimerDebugMode::default(),
        }
    }

    /// Read access to the retimer debug-mode singleton.
    #[must_use]
    pub fn retimer(&self) -> &RetimerDebugMode {
        &self.retimer
    }

    /// Record the retimer vendor id supplied by the platform service.
    pub fn set_retimer_vendor_id(&mut self, vendor_id: impl Into<String>) {
        self.retimer.set_vendor_id(vendor_id);
    }

    fn in_flight_contains(&self, diag: DiagnosticType) -> bool {
        self.in_flight.values().any(|&t| t == diag)
    }

    fn check_exclusion(&self, diag: DiagnosticType) -> Result<(), DumpError> {
        if self.in_flight_contains(diag) {
            return Err(DumpError::Unavailable(format!(
                "{diag} collection is already in progress"
            )));
        }
        let conflicting = match diag {
            DiagnosticType::RetLtssm => Some(DiagnosticType::RetRegister),
            DiagnosticType::RetRegister => Some(DiagnosticType::RetLtssm),
            _ => None,
        };
        if let Some(other) = conflicting {
            if self.in_flight_contains(other) {
                return Err(DumpError::Unavailable(format!(
                    "{diag} excluded while {other} collection is in progress"
                )));
            }
        }
        Ok(())
    }

    fn finish(&mut self, id: u32) {
        if let Some(diag) = self.in_flight.remove(&id) {
            debug!(id, diagnostic_type = %diag, "system collection finished");
            if diag == DiagnosticType::RetLtssm {
                self.retimer.set_enabled(false);
            }
        }
    }

    fn command_for(
        &self,
        diag: Option<DiagnosticType>,
        params: &CreateParams,
        target: &Path,
        id: u32,
        allowed_size_kb: u64,
    ) -> CollectorCommand {
        let id_s = id.to_string();
        let dir_s = target.display().to_string();
        let base = |program: &PathBuf, verbose: bool| {
            let mut args = vec![
                "-p".to_string(),
                dir_s.clone(),
                "-i".to_string(),
                id_s.clone(),
            ];
            if verbose {
                args.push("-v".to_string());
            }
            CollectorCommand::new(program, args)
        };

        match diag {
            None => {
                // Plain dreport collection, forwarding the platform
                // credentials positionally.
                let mut add_args = Vec::new();
                for key in ["bf_ip", "bf_username", "bf_password"] {
                    if let Some(value) = params.get(key) {
                        add_args.push(format!("{key}={value}"));
                    }
                }
                CollectorCommand::new(
                    &self.collectors.dreport,
                    dreport_args(target, id, allowed_size_kb, None, "system", &add_args),
                )
            }
            Some(DiagnosticType::SelfTest) => base(&self.collectors.selftest, true),
            Some(DiagnosticType::Fpga) => base(&self.collectors.fpga, false),
            Some(DiagnosticType::Erot | DiagnosticType::Rot) => base(&self.collectors.erot, false),
            Some(DiagnosticType::RetLtssm) => {
                let mut cmd = base(&self.collectors.ret_ltssm, false);
                if let Some(vendor) = self.retimer.vendor_id() {
                    cmd.args.push("-v".to_string());
                    cmd.args.push(vendor.to_string());
                }
                cmd
            }
            Some(DiagnosticType::RetRegister) => {
                let mut cmd = base(&self.collectors.ret_register, false);
                if let Some(addr) = params.get("Address") {
                    cmd.args.push("-a".to_string());
                    cmd.args.push(addr.to_string());
                }
                if let Some(vendor) = self.retimer.vendor_id() {
                    cmd.args.push("-v".to_string());
                    cmd.args.push(vendor.to_string());
                }
                cmd
            }
            Some(DiagnosticType::FirmwareAttributes) => base(&self.collectors.fw_atts, true),
            Some(DiagnosticType::HardwareCheckout) => base(&self.collectors.hwcheckout, true),
        }
    }
}

impl FamilyPolicy for SystemPolicy {
    type Attrs = SystemAttrs;
    type CreateHint = ();

    fn family(&self) -> DumpFamily {
        DumpFamily::System
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        &["DiagnosticType", "Address", "bf_ip", "bf_username", "bf_password"]
    }

    fn plan(
        &mut self,
        params: &CreateParams,
        _hint: (),
        ctx: &PlanContext<'_>,
    ) -> Result<CollectionPlan<SystemAttrs>, DumpError> {
        let diag = match params.get("DiagnosticType") {
            Some(raw) if !raw.is_empty() => Some(raw.parse::<DiagnosticType>()?),
            _ => None,
        };

        if let Some(diag) = diag {
            self.check_exclusion(diag)?;
        }

        let attrs = SystemAttrs {
            diagnostic_type: diag,
            process_group: 0,
        };
        let target = ctx.staging.join(ctx.next_id.to_string());
        let command = self.command_for(diag, params, &target, ctx.next_id, ctx.allowed_size_kb);

        Ok(CollectionPlan {
            command,
            attrs,
            produces_entry: true,
        })
    }

    fn restored_attrs(&self, _payload: &Path) -> SystemAttrs {
        SystemAttrs::default()
    }

    fn record_spawn(&self, attrs: &mut SystemAttrs, pgid: i32) {
        attrs.process_group = pgid;
    }

    fn clear_process_group(&self, attrs: &mut SystemAttrs) {
        attrs.process_group = 0;
    }

    fn process_group(&self, attrs: &SystemAttrs) -> i32 {
        attrs.process_group
    }

    fn on_spawned(&mut self, id: u32, attrs: &SystemAttrs) {
        if let Some(diag) = attrs.diagnostic_type {
            self.in_flight.insert(id, diag);
            if diag == DiagnosticType::RetLtssm {
                self.retimer.set_enabled(true);
            }
        }
    }

    fn on_terminal(&mut self, entry: &Entry<SystemAttrs>) {
        self.finish(entry.id);
    }

    fn on_child_exit(&mut self, id: u32) {
        self.finish(id);
    }

    fn progress_interval(&self) -> Option<Duration> {
        Some(self.progress_interval)
    }
}
