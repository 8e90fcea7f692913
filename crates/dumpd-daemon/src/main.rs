//! dumpd - dump manager daemon.
//!
//! Instantiates every enabled dump family manager, restores their catalogs
//! from the staging directories, arms the staging watchers, and serves the
//! bus surface on a Unix domain socket until SIGTERM or SIGINT.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dumpd_core::config::DumpdConfig;
use dumpd_core::watch::{DumpWatch, WatchReceiver};
use dumpd_daemon::state::{Engine, EngineHandle, SharedEngine};
use dumpd_daemon::{server, tasks};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// dumpd daemon - dump collection and lifecycle management
#[derive(Parser, Debug)]
#[command(name = "dumpd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/dumpd/dumpd.toml")]
    config: PathBuf,

    /// Path to the bus Unix socket (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = if args.config.exists() {
        DumpdConfig::from_file(&args.config).context("failed to load configuration")?
    } else {
        info!("no config file found at {:?}, using defaults", args.config);
        DumpdConfig::default()
    };
    let socket_path = args.socket.unwrap_or_else(|| config.socket.clone());

    let mut engine = Engine::new(config).context("failed to initialize dump managers")?;

    // Arm the staging watchers before restore so nothing lands unobserved,
    // then rebuild every catalog from disk.
    let mut pumps: Vec<(WatchReceiver, Pump)> = Vec::new();
    let mut watches = Vec::new();
    let mut tickers: Vec<(Duration, Pump)> = Vec::new();
    for pump in [Pump::Bmc, Pump::System, Pump::FaultLog, Pump::Fdr] {
        let Some((staging, interval)) = pump.probe(&engine) else {
            continue;
        };
        let (watch, rx) = DumpWatch::spawn(&staging)
            .with_context(|| format!("failed to watch {}", staging.display()))?;
        watches.push(watch);
        pumps.push((rx, pump));
        if let Some(period) = interval {
            tickers.push((period, pump));
        }
    }
    engine.restore_all();

    let state: SharedEngine = Arc::new(EngineHandle::new(engine));
    for (rx, pump) in pumps {
        pump.spawn_pump(&state, rx);
    }
    for (period, pump) in tickers {
        pump.spawn_ticker(&state, period);
    }

    info!(
        "dumpd started (pid: {}, socket: {:?})",
        std::process::id(),
        socket_path
    );

    let server_state = state.clone();
    let server_socket = socket_path.clone();
    let mut server =
        tokio::spawn(async move { server::run(&server_socket, server_state).await });

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        result = &mut server => {
            return result.context("bus server task failed")?;
        }
    }

    state.request_shutdown();
    if let Err(e) = server.await.context("bus server task failed")? {
        warn!("bus server exited with error: {e}");
    }

    info!("dumpd stopped");
    Ok(())
}

/// Family selector used to wire watch pumps and progress tickers without
/// naming the concrete policy types at every call site.
#[derive(Debug, Clone, Copy)]
enum Pump {
    Bmc,
    System,
    FaultLog,
    Fdr,
}

impl Pump {
    /// Staging root and progress interval when the family is enabled.
    fn probe(self, engine: &Engine) -> Option<(PathBuf, Option<Duration>)> {
        match self {
            Self::Bmc => engine
                .bmc
                .as_ref()
                .map(|m| (m.staging().to_path_buf(), m.progress_interval())),
            Self::System => engine
                .system
                .as_ref()
                .map(|m| (m.staging().to_path_buf(), m.progress_interval())),
            Self::FaultLog => engine
                .faultlog
                .as_ref()
                .map(|m| (m.staging().to_path_buf(), m.progress_interval())),
            Self::Fdr => engine
                .fdr
                .as_ref()
                .map(|m| (m.staging().to_path_buf(), m.progress_interval())),
        }
    }

    fn spawn_pump(self, state: &SharedEngine, rx: WatchReceiver) {
        match self {
            Self::Bmc => tasks::spawn_watch_pump(state.clone(), rx, Engine::bmc_mut),
            Self::System => tasks::spawn_watch_pump(state.clone(), rx, Engine::system_mut),
            Self::FaultLog => tasks::spawn_watch_pump(state.clone(), rx, Engine::faultlog_mut),
            Self::Fdr => tasks::spawn_watch_pump(state.clone(), rx, Engine::fdr_mut),
        }
    }

    fn spawn_ticker(self, state: &SharedEngine, period: Duration) {
        match self {
            Self::Bmc => tasks::spawn_progress_ticker(state.clone(), period, Engine::bmc_mut),
            Self::System => tasks::spawn_progress_ticker(state.clone(), period, Engine::system_mut),
            Self::FaultLog => {
                tasks::spawn_progress_ticker(state.clone(), period, Engine::faultlog_mut);
            },
            Self::Fdr => tasks::spawn_progress_ticker(state.clone(), period, Engine::fdr_mut),
        }
    }
}
