//! Fault-log dump family.
//!
//! Fault-log records ingested from standardized error records (CPER). The
//! collector deposits the raw record plus a decoded JSON rendition; the
//! decoded attributes are lifted onto the entry once the payload lands.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collector::CollectorCommand;
use crate::config::FaultLogConfig;
use crate::cper::CperAttrs;
use crate::entry::{DumpFamily, Entry};
use crate::error::DumpError;
use crate::manager::{CollectionPlan, CreateParams, FamilyPolicy, PlanContext};

/// Kind of fault data carried by an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultDataType {
    /// Common Platform Error Record.
    #[default]
    Cper,
}

impl std::fmt::Display for FaultDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cper => write!(f, "CPER"),
        }
    }
}

/// Family-specific attributes of a fault-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultLogAttrs {
    /// Kind of fault data.
    pub fault_data_type: FaultDataType,
    /// Additional type string supplied by the requester.
    pub additional_type_name: String,
    /// Primary log id assigned by the engine.
    pub primary_log_id: String,
    /// Attributes lifted from the decoded record.
    #[serde(default)]
    pub cper: CperAttrs,
}

impl Default for FaultLogAttrs {
    fn default() -> Self {
        Self {
            fault_data_type: FaultDataType::Cper,
            additional_type_name: "CPER".to_string(),
            primary_log_id: "0".to_string(),
            cper: CperAttrs::default(),
        }
    }
}

/// Policy for the fault-log dump family.
pub struct FaultLogPolicy {
    collector: PathBuf,
    last_cper_id: u64,
}

impl FaultLogPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn new(cfg: &FaultLogConfig) -> Self {
        Self {
            collector: cfg.collector.clone(),
            last_cper_id: 0,
        }
    }
}

impl FamilyPolicy for FaultLogPolicy {
    type Attrs = FaultLogAttrs;
    type CreateHint = ();

    fn family(&self) -> DumpFamily {
        DumpFamily::FaultLog
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        &["CPER_TYPE", "CPER_PATH"]
    }

    fn plan(
        &mut self,
        params: &CreateParams,
        _hint: (),
        ctx: &PlanContext<'_>,
    ) -> Result<CollectionPlan<FaultLogAttrs>, DumpError> {
        let (cper_type, cper_path) = match (params.get("CPER_TYPE"), params.get("CPER_PATH")) {
            (Some(t), Some(p)) => (t.to_string(), p.to_string()),
            _ => {
                return Err(DumpError::invalid_argument(
                    "CPER_TYPE/CPER_PATH",
                    "both are required for a fault-log dump",
                ));
            },
        };

        self.last_cper_id += 1;
        let attrs = FaultLogAttrs {
            fault_data_type: FaultDataType::Cper,
            additional_type_name: cper_type,
            primary_log_id: self.last_cper_id.to_string(),
            cper: CperAttrs::default(),
        };

        let target = ctx.staging.join(ctx.next_id.to_string());
        let args = vec![
            "-p".to_string(),
            target.display().to_string(),
            "-i".to_string(),
            ctx.next_id.to_string(),
            "-s".to_string(),
            cper_path,
        ];

        Ok(CollectionPlan {
            command: CollectorCommand::new(&self.collector, args),
            attrs,
            produces_entry: true,
        })
    }

    fn restored_attrs(&self, _payload: &Path) -> FaultLogAttrs {
        FaultLogAttrs::default()
    }

    fn on_payload(&self, entry: &mut Entry<FaultLogAttrs>, dump_dir: &Path) {
        entry.attrs.cper = CperAttrs::from_dump_dir(dump_dir);
    }

    fn restore_per_file(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> CreateParams {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CreateParams::new(map)
    }

    #[test]
    fn test_requires_both_cper_parameters() {
        let mut p = FaultLogPolicy::new(&FaultLogConfig::default());
        let staging = Path::new("/staging");
        let ctx = PlanContext {
            staging,
            next_id: 7,
            allowed_size_kb: 100,
        };

        let err = p
            .plan(&params(&[("CPER_TYPE", "pcie")]), (), &ctx)
            .unwrap_err();
        assert!(matches!(err, DumpError::InvalidArgument { .. }));
    }

    #[test]
    fn test_plan_builds_cper_invocation_and_log_id() {
        let mut p = FaultLogPolicy::new(&FaultLogConfig::default());
        let staging = Path::new("/staging");
        let ctx = PlanContext {
            staging,
            next_id: 7,
            allowed_size_kb: 100,
        };

        let plan = p
            .plan(
                &params(&[("CPER_TYPE", "pcie"), ("CPER_PATH", "/tmp/record.cper")]),
                (),
                &ctx,
            )
            .unwrap();
        assert_eq!(plan.attrs.primary_log_id, "1");
        assert_eq!(plan.attrs.additional_type_name, "pcie");
        assert_eq!(
            plan.command.args,
            vec!["-p", "/staging/7", "-i", "7", "-s", "/tmp/record.cper"]
        );

        let plan2 = p
            .plan(
                &params(&[("CPER_TYPE", "pcie"), ("CPER_PATH", "/tmp/record.cper")]),
                (),
                &ctx,
            )
            .unwrap();
        assert_eq!(plan2.attrs.primary_log_id, "2");
    }
}
