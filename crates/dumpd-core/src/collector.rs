//! Collector process handling.
//!
//! Collectors are opaque executables invoked with documented argument
//! vectors. Each one runs in its own process group so a timed-out
//! collection can be terminated wholesale with a single process-group
//! signal.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setpgid, Pid};
use tokio::process::{Child, Command};
use tracing::{error, info};

use crate::error::DumpError;

/// A collector invocation: program plus argument vector.
#[derive(Debug, Clone)]
pub struct CollectorCommand {
    /// Path of the collector executable.
    pub program: std::path::PathBuf,
    /// Arguments, excluding argv[0].
    pub args: Vec<String>,
}

impl CollectorCommand {
    /// Build a command from a program path and arguments.
    pub fn new<I, S>(program: impl Into<std::path::PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Spawn the collector in its own process group.
    ///
    /// # Errors
    ///
    /// Returns [`DumpError::Internal`] if the process cannot be spawned or
    /// its pid cannot be obtained.
    pub fn spawn_in_own_group(&self) -> Result<SpawnedCollector, DumpError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // SAFETY: setpgid is async-signal-safe; nothing else runs between
        // fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            DumpError::Internal(format!("spawn collector {}: {e}", self.program.display()))
        })?;

        let pid = child.id().ok_or_else(|| {
            DumpError::Internal(format!(
                "collector {} exited before pid was recorded",
                self.program.display()
            ))
        })?;

        info!(collector = %self.program.display(), pid, "collector started");

        Ok(SpawnedCollector {
            pgid: pid as i32,
            child,
        })
    }
}

/// A running collector with its process-group id.
#[derive(Debug)]
pub struct SpawnedCollector {
    /// Process-group id (equals the collector's pid).
    pub pgid: i32,
    /// Child handle to await.
    pub child: Child,
}

impl SpawnedCollector {
    /// Wait for the collector to exit.
    pub async fn wait(mut self) -> ExitInfo {
        match self.child.wait().await {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                error!(pgid = self.pgid, error = %e, "waiting for collector failed");
                ExitInfo {
                    code: None,
                    signal: None,
                }
            },
        }
    }
}

/// Outcome of a collector process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the collector exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when it was killed.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Returns `true` only for a normal zero exit.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Send SIGTERM to a collector's whole process group.
///
/// SIGTERM rather than SIGKILL: collectors trap it to clean up their
/// scratch files. Delivery failures are logged and ignored; the group may
/// already be gone.
pub fn terminate_group(pgid: i32) {
    if pgid <= 0 {
        return;
    }
    info!(pgid, "terminating collector process group");
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        error!(pgid, error = %e, "failed to signal collector process group");
    }
}

/// dreport argument vector shared by the BMC and system families.
#[must_use]
pub fn dreport_args(
    dump_dir: &Path,
    id: u32,
    size_kb: u64,
    extra_path: Option<&Path>,
    dump_type: &str,
    add_args: &[String],
) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        dump_dir.display().to_string(),
        "-i".to_string(),
        id.to_string(),
        "-s".to_string(),
        size_kb.to_string(),
        "-q".to_string(),
        "-v".to_string(),
        "-p".to_string(),
        extra_path.map_or_else(String::new, |p| p.display().to_string()),
        "-t".to_string(),
        dump_type.to_string(),
    ];
    for add in add_args {
        args.push("-a".to_string());
        args.push(add.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_wait_clean_exit() {
        let cmd = CollectorCommand::new("sh", ["-c", "exit 0"]);
        let spawned = cmd.spawn_in_own_group().unwrap();
        let info = spawned.wait().await;
        assert!(info.is_clean());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_clean() {
        let cmd = CollectorCommand::new("sh", ["-c", "exit 3"]);
        let spawned = cmd.spawn_in_own_group().unwrap();
        let info = spawned.wait().await;
        assert_eq!(info.code, Some(3));
        assert!(!info.is_clean());
    }

    #[tokio::test]
    async fn test_missing_collector_is_internal_error() {
        let cmd = CollectorCommand::new("/nonexistent/dumpd-collector", ["-x"]);
        assert!(matches!(
            cmd.spawn_in_own_group(),
            Err(DumpError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_collector_runs_in_own_group_and_terminates() {
        let cmd = CollectorCommand::new("sleep", ["30"]);
        let spawned = cmd.spawn_in_own_group().unwrap();
        let pgid = spawned.pgid;

        let child_pgid = nix::unistd::getpgid(Some(Pid::from_raw(pgid))).unwrap();
        assert_eq!(child_pgid, Pid::from_raw(pgid));

        terminate_group(pgid);
        let info = spawned.wait().await;
        assert_eq!(info.signal, Some(libc_sigterm()));
    }

    fn libc_sigterm() -> i32 {
        Signal::SIGTERM as i32
    }

    #[test]
    fn test_dreport_args_order() {
        let args = dreport_args(
            Path::new("/var/lib/dumpd/bmc/5"),
            5,
            1024,
            None,
            "user-requested",
            &["bf_ip=10.0.0.1".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "-d",
                "/var/lib/dumpd/bmc/5",
                "-i",
                "5",
                "-s",
                "1024",
                "-q",
                "-v",
                "-p",
                "",
                "-t",
                "user-requested",
                "-a",
                "bf_ip=10.0.0.1",
            ]
        );
    }
}
