//! Shared daemon state.
//!
//! The engine (every enabled family manager plus the error-log watcher)
//! lives behind one `RwLock`; bus handlers, watch pumps, progress tickers,
//! and child supervision tasks all mutate it through the shared handle.
//! Run-to-completion of each locked section gives the same ordering
//! guarantees the managers rely on.

use std::sync::Arc;
use std::time::Instant;

use dumpd_core::config::DumpdConfig;
use dumpd_core::elog::ErrorLogWatcher;
use dumpd_core::error::DumpError;
use dumpd_core::families::bmc::BmcPolicy;
use dumpd_core::families::faultlog::FaultLogPolicy;
use dumpd_core::families::fdr::FdrPolicy;
use dumpd_core::families::system::SystemPolicy;
use dumpd_core::ipc::FamilyStatus;
use dumpd_core::manager::{FamilyManager, FamilyPolicy};
use tokio::sync::{watch, RwLock};

/// Shared engine handle.
pub type SharedEngine = Arc<EngineHandle>;

/// The daemon's mutable state: one manager per enabled family.
pub struct Engine {
    /// Loaded configuration.
    pub config: DumpdConfig,
    /// BMC family manager.
    pub bmc: Option<FamilyManager<BmcPolicy>>,
    /// System family manager.
    pub system: Option<FamilyManager<SystemPolicy>>,
    /// Fault-log family manager.
    pub faultlog: Option<FamilyManager<FaultLogPolicy>>,
    /// FDR family manager.
    pub fdr: Option<FamilyManager<FdrPolicy>>,
    /// Error-log watcher state.
    pub elog: ErrorLogWatcher,
}

impl Engine {
    /// Instantiate every enabled family manager over its staging root.
    ///
    /// # Errors
    ///
    /// Returns [`DumpError::Internal`] when a staging root cannot be
    /// created.
    pub fn new(config: DumpdConfig) -> Result<Self, DumpError> {
        let bmc = if config.bmc.common.enabled {
            Some(FamilyManager::new(
                BmcPolicy::new(&config.bmc),
                config.limits_for(&config.bmc.common),
            )?)
        } else {
            None
        };
        let system = if config.system.common.enabled {
            Some(FamilyManager::new(
                SystemPolicy::new(&config.system),
                config.limits_for(&config.system.common),
            )?)
        } else {
            None
        };
        let faultlog = if config.faultlog.common.enabled {
            Some(FamilyManager::new(
                FaultLogPolicy::new(&config.faultlog),
                config.limits_for(&config.faultlog.common),
            )?)
        } else {
            None
        };
        let fdr = if config.fdr.common.enabled {
            Some(FamilyManager::new(
                FdrPolicy::new(&config.fdr),
                config.limits_for(&config.fdr.common),
            )?)
        } else {
            None
        };
        let elog = ErrorLogWatcher::load(&config.elog_state_file);

        Ok(Self {
            config,
            bmc,
            system,
            faultlog,
            fdr,
            elog,
        })
    }

    /// Rebuild every family catalog from on-disk state.
    pub fn restore_all(&mut self) {
        if let Some(mgr) = self.bmc.as_mut() {
            mgr.restore();
        }
        if let Some(mgr) = self.system.as_mut() {
            mgr.restore();
        }
        if let Some(mgr) = self.faultlog.as_mut() {
            mgr.restore();
        }
        if let Some(mgr) = self.fdr.as_mut() {
            mgr.restore();
        }
    }

    /// BMC manager accessor (usable as a task selector).
    pub fn bmc_mut(&mut self) -> Option<&mut FamilyManager<BmcPolicy>> {
        self.bmc.as_mut()
    }

    /// System manager accessor (usable as a task selector).
    pub fn system_mut(&mut self) -> Option<&mut FamilyManager<SystemPolicy>> {
        self.system.as_mut()
    }

    /// Fault-log manager accessor (usable as a task selector).
    pub fn faultlog_mut(&mut self) -> Option<&mut FamilyManager<FaultLogPolicy>> {
        self.faultlog.as_mut()
    }

    /// FDR manager accessor (usable as a task selector).
    pub fn fdr_mut(&mut self) -> Option<&mut FamilyManager<FdrPolicy>> {
        self.fdr.as_mut()
    }

    /// Status blocks for every enabled family.
    #[must_use]
    pub fn family_status(&self) -> Vec<FamilyStatus> {
        let mut out = Vec::new();
        if let Some(mgr) = &self.bmc {
            out.push(status_of(mgr));
        }
        if let Some(mgr) = &self.system {
            out.push(status_of(mgr));
        }
        if let Some(mgr) = &self.faultlog {
            out.push(status_of(mgr));
        }
        if let Some(mgr) = &self.fdr {
            out.push(status_of(mgr));
        }
        out
    }
}

fn status_of<P: FamilyPolicy>(mgr: &FamilyManager<P>) -> FamilyStatus {
    FamilyStatus {
        family: mgr.family(),
        entries: mgr.catalog().len(),
        last_id: mgr.last_id(),
        in_progress: mgr
            .catalog()
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count(),
    }
}

/// Handle wrapping the engine with interior mutability and lifecycle state.
pub struct EngineHandle {
    inner: RwLock<Engine>,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
}

impl EngineHandle {
    /// Wrap an engine.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: RwLock::new(engine),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Read access to the engine.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Engine> {
        self.inner.read().await
    }

    /// Write access to the engine.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Engine> {
        self.inner.write().await
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Request shutdown, waking everything blocked on
    /// [`shutdown_signal`](Self::shutdown_signal).
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once shutdown has been requested. Resolves immediately if
    /// it already was.
    pub async fn shutdown_signal(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Seconds since the handle was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
