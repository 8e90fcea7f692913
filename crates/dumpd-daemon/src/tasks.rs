//! Background tasks driving the engine.
//!
//! Each enabled family gets a watch pump (staging events into the manager)
//! and, where the family reports progress, a progress ticker. Every spawned
//! collector gets a supervision task that routes its exit back to the
//! owning entry.

use std::time::Duration;

use dumpd_core::collector::SpawnedCollector;
use dumpd_core::manager::{FamilyManager, FamilyPolicy};
use dumpd_core::watch::WatchReceiver;
use tracing::debug;

use crate::state::{Engine, SharedEngine};

/// Selector from the engine to one family manager. Plain function pointers
/// so tasks stay `'static` without capturing the engine.
pub type Select<P> = fn(&mut Engine) -> Option<&mut FamilyManager<P>>;

/// Pump watch batches into the family manager until the watcher stops.
pub fn spawn_watch_pump<P: FamilyPolicy>(
    state: SharedEngine,
    mut rx: WatchReceiver,
    select: Select<P>,
) {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let mut engine = state.write().await;
            if let Some(mgr) = select(&mut engine) {
                mgr.handle_watch_events(&batch);
            }
        }
        debug!("watch pump stopped");
    });
}

/// Periodically advance progress and enforce collection timeouts.
pub fn spawn_progress_ticker<P: FamilyPolicy>(
    state: SharedEngine,
    period: Duration,
    select: Select<P>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = state.shutdown_signal() => break,
                _ = ticker.tick() => {
                    let mut engine = state.write().await;
                    if let Some(mgr) = select(&mut engine) {
                        mgr.progress_tick();
                    }
                }
            }
        }
    });
}

/// Await a collector's exit and deliver it to the family manager.
///
/// The supervision registration is implicit in the task: it fires exactly
/// once and is released on completion.
pub fn supervise_collector<P: FamilyPolicy>(
    state: SharedEngine,
    select: Select<P>,
    id: u32,
    collector: SpawnedCollector,
) {
    tokio::spawn(async move {
        let info = collector.wait().await;
        let mut engine = state.write().await;
        if let Some(mgr) = select(&mut engine) {
            mgr.child_exited(id, info);
        }
    });
}
