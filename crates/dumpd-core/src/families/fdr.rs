//! FDR dump family.
//!
//! Field-data-request bundles. The request carries an action: `Collect`
//! produces a catalog entry, `Clean` only runs the collector to prune its
//! own storage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collector::CollectorCommand;
use crate::config::FdrConfig;
use crate::entry::DumpFamily;
use crate::error::DumpError;
use crate::manager::{CollectionPlan, CreateParams, FamilyPolicy, PlanContext};

/// Action requested from the FDR collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdrAction {
    /// Collect a bundle; adds a catalog entry.
    #[default]
    Collect,
    /// Clean collector-side storage; no entry is added.
    Clean,
}

impl FdrAction {
    /// Value passed to the collector's `-a` option.
    #[must_use]
    pub const fn arg(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Clean => "clean",
        }
    }
}

impl std::str::FromStr for FdrAction {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Collect" => Ok(Self::Collect),
            "Clean" => Ok(Self::Clean),
            other => Err(DumpError::invalid_argument("Action", other)),
        }
    }
}

/// Family-specific attributes of an FDR entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FdrAttrs {}

/// Policy for the FDR dump family.
pub struct FdrPolicy {
    collector: PathBuf,
}

impl FdrPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn new(cfg: &FdrConfig) -> Self {
        Self {
            collector: cfg.collector.clone(),
        }
    }
}

impl FamilyPolicy for FdrPolicy {
    type Attrs = FdrAttrs;
    type CreateHint = ();

    fn family(&self) -> DumpFamily {
        DumpFamily::Fdr
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        &[
            "DiagnosticType",
            "Action",
            "TimeRangeStart",
            "TimeRangeEnd",
            "MaxDumpSize",
            "ExtendedSource",
        ]
    }

    fn plan(
        &mut self,
        params: &CreateParams,
        _hint: (),
        ctx: &PlanContext<'_>,
    ) -> Result<CollectionPlan<FdrAttrs>, DumpError> {
        match params.get("DiagnosticType") {
            Some("FDR") => {},
            Some(other) => return Err(DumpError::invalid_argument("DiagnosticType", other)),
            None => return Err(DumpError::invalid_argument("DiagnosticType", "")),
        }

        let action = match params.get("Action") {
            Some(raw) => raw.parse::<FdrAction>()?,
            None => FdrAction::default(),
        };

        let target = ctx.staging.join(ctx.next_id.to_string());
        let mut args = vec![
            "-p".to_string(),
            target.display().to_string(),
            "-i".to_string(),
            ctx.next_id.to_string(),
            "-a".to_string(),
            action.arg().to_string(),
        ];
        for (key, flag) in [
            ("TimeRangeStart", "-s"),
            ("TimeRangeEnd", "-e"),
            ("MaxDumpSize", "-m"),
            ("ExtendedSource", "-S"),
        ] {
            if let Some(value) = params.get(key) {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }

        Ok(CollectionPlan {
            command: CollectorCommand::new(&self.collector, args),
            attrs: FdrAttrs {},
            produces_entry: action == FdrAction::Collect,
        })
    }

    fn restored_attrs(&self, _payload: &Path) -> FdrAttrs {
        FdrAttrs {}
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

    fn ctx(staging: &Path) -> PlanContext<'_> {
        PlanContext {
            staging,
            next_id: 2,
            allowed_size_kb: 100,
        }
    }

    #[test]
    fn test_diagnostic_type_is_required_and_checked() {
        let mut p = FdrPolicy::new(&FdrConfig::default());
        let staging = Path::new("/staging");

        assert!(matches!(
            p.plan(&params(&[]), (), &ctx(staging)),
            Err(DumpError::InvalidArgument { .. })
        ));
        assert!(matches!(
            p.plan(&params(&[("DiagnosticType", "BMC")]), (), &ctx(staging)),
            Err(DumpError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_collect_produces_entry_with_forwarded_range() {
        let mut p = FdrPolicy::new(&FdrConfig::default());
        let staging = Path::new("/staging");
        let plan = p
            .plan(
                &params(&[
                    ("DiagnosticType", "FDR"),
                    ("TimeRangeStart", "1700000000"),
                    ("TimeRangeEnd", "1700003600"),
                    ("MaxDumpSize", "4096"),
                ]),
                (),
                &ctx(staging),
            )
            .unwrap();

        assert!(plan.produces_entry);
        assert_eq!(
            plan.command.args,
            vec![
                "-p",
                "/staging/2",
                "-i",
                "2",
                "-a",
                "collect",
                "-s",
                "1700000000",
                "-e",
                "1700003600",
                "-m",
                "4096",
            ]
        );
    }

    #[test]
    fn test_clean_action_skips_catalog() {
        let mut p = FdrPolicy::new(&FdrConfig::default());
        let staging = Path::new("/staging");
        let plan = p
            .plan(
                &params(&[("DiagnosticType", "FDR"), ("Action", "Clean")]),
                (),
                &ctx(staging),
            )
            .unwrap();
        assert!(!plan.produces_entry);
        assert!(plan.command.args.contains(&"clean".to_string()));
    }

    #[test]
    fn test_unknown_action_is_invalid() {
        let mut p = FdrPolicy::new(&FdrConfig::default());
        let staging = Path::new("/staging");
        let err = p
            .plan(
                &params(&[("DiagnosticType", "FDR"), ("Action", "Explode")]),
                (),
                &ctx(staging),
            )
            .unwrap_err();
        assert!(matches!(err, DumpError::InvalidArgument { .. }));
    }
}
