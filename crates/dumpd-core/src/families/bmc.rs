//! BMC dump family.
//!
//! General BMC dumps collected by dreport. Bus requests always collect the
//! "user-requested" category; the error-log watcher requests
//! "application-cored" dumps internally. Application-core entries live one
//! directory level deeper and count against their own entry quota.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{dreport_args, CollectorCommand};
use crate::config::BmcConfig;
use crate::entry::DumpFamily;
use crate::error::DumpError;
use crate::manager::{CollectionPlan, CreateParams, FamilyPolicy, PlanContext, QuotaBucket};

/// Category of a BMC dump, mapped onto a staging subdirectory and the
/// dreport `-t` argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmcDumpKind {
    /// Dump asked for by a management client.
    #[default]
    UserRequested,
    /// Dump triggered by an application core.
    ApplicationCored,
}

impl BmcDumpKind {
    /// Category label used for the collector and the staging layout.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UserRequested => "user-requested",
            Self::ApplicationCored => "application-cored",
        }
    }
}

/// Family-specific attributes of a BMC dump entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BmcAttrs {
    /// Dump category.
    pub kind: BmcDumpKind,
    /// Collector process group while in progress; 0 otherwise. Not
    /// persisted.
    #[serde(skip)]
    pub process_group: i32,
}

/// Policy for the BMC dump family.
pub struct BmcPolicy {
    collector: PathBuf,
    extra_report_path: Option<PathBuf>,
    core_max_limit: u32,
    progress_interval: Duration,
}

impl BmcPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn new(cfg: &BmcConfig) -> Self {
        Self {
            collector: cfg.collector.clone(),
            extra_report_path: cfg.extra_report_path.clone(),
            core_max_limit: cfg.core_max_limit,
            progress_interval: cfg.common.progress_interval,
        }
    }
}

impl FamilyPolicy for BmcPolicy {
    type Attrs = BmcAttrs;
    type CreateHint = BmcDumpKind;

    fn family(&self) -> DumpFamily {
        DumpFamily::Bmc
    }

    fn recognized_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn plan(
        &mut self,
        _params: &CreateParams,
        kind: BmcDumpKind,
        ctx: &PlanContext<'_>,
    ) -> Result<CollectionPlan<BmcAttrs>, DumpError> {
        let attrs = BmcAttrs {
            kind,
            process_group: 0,
        };
        let target = self.entry_dir(ctx.staging, ctx.next_id, &attrs);
        let args = dreport_args(
            &target,
            ctx.next_id,
            ctx.allowed_size_kb,
            self.extra_report_path.as_deref(),
            kind.label(),
            &[],
        );
        Ok(CollectionPlan {
            command: CollectorCommand::new(&self.collector, args),
            attrs,
            produces_entry: true,
        })
    }

    fn restored_attrs(&self, payload: &Path) -> BmcAttrs {
        let is_core = payload
            .components()
            .any(|c| c.as_os_str() == BmcDumpKind::ApplicationCored.label());
        BmcAttrs {
            kind: if is_core {
                BmcDumpKind::ApplicationCored
            } else {
                BmcDumpKind::UserRequested
            },
            process_group: 0,
        }
    }

    fn entry_dir(&self, staging: &Path, id: u32, attrs: &BmcAttrs) -> PathBuf {
        match attrs.kind {
            BmcDumpKind::UserRequested => staging.join(id.to_string()),
            BmcDumpKind::ApplicationCored => staging
                .join(BmcDumpKind::ApplicationCored.label())
                .join(id.to_string()),
        }
    }

    fn record_spawn(&self, attrs: &mut BmcAttrs, pgid: i32) {
        attrs.process_group = pgid;
    }

    fn clear_process_group(&self, attrs: &mut BmcAttrs) {
        attrs.process_group = 0;
    }

    fn process_group(&self, attrs: &BmcAttrs) -> i32 {
        attrs.process_group
    }

    fn buckets(&self, max_limit: u32) -> Vec<QuotaBucket<BmcAttrs>> {
        vec![
            QuotaBucket {
                limit: max_limit,
                matches: |a| a.kind == BmcDumpKind::UserRequested,
            },
            QuotaBucket {
                limit: self.core_max_limit,
                matches: |a| a.kind == BmcDumpKind::ApplicationCored,
            },
        ]
    }

    fn restore_roots(&self, staging: &Path) -> Vec<PathBuf> {
        vec![
            staging.to_path_buf(),
            staging.join(BmcDumpKind::ApplicationCored.label()),
        ]
    }

    fn progress_interval(&self) -> Option<Duration> {
        Some(self.progress_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BmcPolicy {
        BmcPolicy::new(&BmcConfig::default())
    }

    #[test]
    fn test_plan_builds_dreport_invocation() {
        let mut p = policy();
        let staging = Path::new("/var/lib/dumpd/bmc");
        let ctx = PlanContext {
            staging,
            next_id: 4,
            allowed_size_kb: 1024,
        };
        let plan = p
            .plan(&CreateParams::default(), BmcDumpKind::UserRequested, &ctx)
            .unwrap();

        assert!(plan.produces_entry);
        assert_eq!(plan.command.program, PathBuf::from("/usr/bin/dreport"));
        assert_eq!(
            plan.command.args[..6],
            [
                "-d".to_string(),
                "/var/lib/dumpd/bmc/4".to_string(),
                "-i".to_string(),
                "4".to_string(),
                "-s".to_string(),
                "1024".to_string(),
            ]
        );
        assert_eq!(plan.command.args[11], "user-requested");
    }

    #[test]
    fn test_core_dumps_live_one_level_deeper() {
        let p = policy();
        let staging = Path::new("/staging");
        let core = BmcAttrs {
            kind: BmcDumpKind::ApplicationCored,
            process_group: 0,
        };
        let user = BmcAttrs::default();
        assert_eq!(
            p.entry_dir(staging, 9, &core),
            PathBuf::from("/staging/application-cored/9")
        );
        assert_eq!(p.entry_dir(staging, 9, &user), PathBuf::from("/staging/9"));
    }

    #[test]
    fn test_restored_kind_follows_path() {
        let p = policy();
        let core = p.restored_attrs(Path::new(
            "/staging/application-cored/3/obmcdump_3_1700000000.tar.xz",
        ));
        assert_eq!(core.kind, BmcDumpKind::ApplicationCored);

        let user = p.restored_attrs(Path::new("/staging/3/obmcdump_3_1700000000.tar.xz"));
        assert_eq!(user.kind, BmcDumpKind::UserRequested);
    }

    #[test]
    fn test_buckets_split_by_category() {
        let p = policy();
        let buckets = p.buckets(20);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].limit, 20);
        assert_eq!(buckets[1].limit, 5);

        let core = BmcAttrs {
            kind: BmcDumpKind::ApplicationCored,
            process_group: 0,
        };
        assert!(!(buckets[0].matches)(&core));
        assert!((buckets[1].matches)(&core));
    }
}
