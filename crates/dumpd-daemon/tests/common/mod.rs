//! Shared helpers for daemon integration tests: an in-process daemon over
//! a real Unix socket, a framed JSON client, and SCM_RIGHTS reception.

#![allow(dead_code)] // Not every test binary uses every helper.

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dumpd_core::config::DumpdConfig;
use dumpd_core::ipc::{frame_message, parse_frame_length, IpcRequest, IpcResponse};
use dumpd_core::watch::DumpWatch;
use dumpd_daemon::state::{Engine, EngineHandle, SharedEngine};
use dumpd_daemon::{server, tasks};
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Timeout for individual test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Write a stub collector that deposits a 4096-byte payload.
pub fn write_stub_collector(dir: &Path) -> PathBuf {
    let script = dir.join("stub_collector.sh");
    std::fs::write(
        &script,
        r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -d|-p) out="$2"; shift 2;;
    -i) id="$2"; shift 2;;
    *) shift;;
  esac
done
mkdir -p "$out"
head -c 4096 /dev/zero > "$out/obmcdump_${id}_1700000000.tar.xz"
"#,
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Write a stub collector that just sleeps for a few seconds.
pub fn write_sleeping_collector(dir: &Path) -> PathBuf {
    let script = dir.join("stub_sleep.sh");
    std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Test configuration rooted in a temp directory, with every family
/// enabled and pointed at `collector`.
pub fn test_config(root: &Path, collector: &Path) -> DumpdConfig {
    let mut cfg = DumpdConfig::default();
    cfg.socket = root.join("dumpd.sock");
    cfg.jffs_inaccuracy_percent = 0;
    cfg.elog_state_file = root.join("elogid");

    cfg.bmc.common.dump_path = root.join("bmc");
    cfg.bmc.common.min_space_reqd_kb = 1;
    cfg.bmc.collector = collector.to_path_buf();

    cfg.system.common.dump_path = root.join("system");
    cfg.system.common.min_space_reqd_kb = 1;
    cfg.system.collectors.dreport = collector.to_path_buf();
    cfg.system.collectors.selftest = collector.to_path_buf();
    cfg.system.collectors.fpga = collector.to_path_buf();
    cfg.system.collectors.erot = collector.to_path_buf();
    cfg.system.collectors.ret_ltssm = collector.to_path_buf();
    cfg.system.collectors.ret_register = collector.to_path_buf();
    cfg.system.collectors.fw_atts = collector.to_path_buf();
    cfg.system.collectors.hwcheckout = collector.to_path_buf();

    cfg.faultlog.common.dump_path = root.join("faultlog");
    cfg.faultlog.common.min_space_reqd_kb = 1;
    cfg.faultlog.collector = collector.to_path_buf();

    cfg.fdr.common.dump_path = root.join("fdr");
    cfg.fdr.common.min_space_reqd_kb = 1;
    cfg.fdr.collector = collector.to_path_buf();

    cfg
}

/// An in-process daemon: engine, background tasks, and bus server.
pub struct TestDaemon {
    /// Shared engine handle.
    pub state: SharedEngine,
    /// Socket the server listens on.
    pub socket: PathBuf,
    /// Owns the temp tree for the daemon's lifetime.
    pub root: TempDir,
    /// Keeps the staging watchers alive.
    _watches: Vec<DumpWatch>,
}

impl TestDaemon {
    /// Connect a client to the daemon socket.
    pub async fn connect(&self) -> UnixStream {
        for _ in 0..100 {
            if let Ok(stream) = UnixStream::connect(&self.socket).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("could not connect to {:?}", self.socket);
    }

    /// Shut the server down.
    pub fn shutdown(&self) {
        self.state.request_shutdown();
    }
}

/// Start an in-process daemon over `config`, mirroring the binary's wiring.
pub async fn spawn_daemon(root: TempDir, config: DumpdConfig) -> TestDaemon {
    let socket = config.socket.clone();
    let mut engine = Engine::new(config).unwrap();

    let mut armed = Vec::new();
    let mut watches = Vec::new();
    for family in ["bmc", "system", "faultlog", "fdr"] {
        let staging = match family {
            "bmc" => engine.bmc.as_ref().map(|m| m.staging().to_path_buf()),
            "system" => engine.system.as_ref().map(|m| m.staging().to_path_buf()),
            "faultlog" => engine.faultlog.as_ref().map(|m| m.staging().to_path_buf()),
            _ => engine.fdr.as_ref().map(|m| m.staging().to_path_buf()),
        };
        if let Some(staging) = staging {
            let (watch, rx) = DumpWatch::spawn(&staging).unwrap();
            watches.push(watch);
            armed.push((family, rx));
        }
    }
    engine.restore_all();

    let state: SharedEngine = Arc::new(EngineHandle::new(engine));
    for (family, rx) in armed {
        match family {
            "bmc" => tasks::spawn_watch_pump(state.clone(), rx, Engine::bmc_mut),
            "system" => tasks::spawn_watch_pump(state.clone(), rx, Engine::system_mut),
            "faultlog" => tasks::spawn_watch_pump(state.clone(), rx, Engine::faultlog_mut),
            _ => tasks::spawn_watch_pump(state.clone(), rx, Engine::fdr_mut),
        }
    }

    let server_state = state.clone();
    let server_socket = socket.clone();
    tokio::spawn(async move {
        let _ = server::run(&server_socket, server_state).await;
    });

    TestDaemon {
        state,
        socket,
        root,
        _watches: watches,
    }
}

/// Send one request frame.
pub async fn send_request(stream: &mut UnixStream, request: &IpcRequest) {
    let json = serde_json::to_vec(request).unwrap();
    stream.write_all(&frame_message(&json)).await.unwrap();
    stream.flush().await.unwrap();
}

/// Read one response frame.
pub async fn read_response(stream: &mut UnixStream) -> IpcResponse {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = parse_frame_length(header);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

/// Round-trip one request.
pub async fn request(stream: &mut UnixStream, req: &IpcRequest) -> IpcResponse {
    send_request(stream, req).await;
    tokio::time::timeout(TEST_TIMEOUT, read_response(stream))
        .await
        .expect("timed out waiting for response")
}

/// Receive a descriptor passed with SCM_RIGHTS after a `FileHandle`
/// response.
pub async fn recv_fd(stream: &UnixStream) -> File {
    loop {
        stream.readable().await.unwrap();
        let mut buf = [0u8; 1];
        let mut iov = [std::io::IoSliceMut::new(&mut buf)];
        let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);
        match recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::empty(),
        ) {
            Ok(msg) => {
                let cmsgs = msg.cmsgs().expect("control messages");
                for cmsg in cmsgs {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        // SAFETY: the kernel just handed us this descriptor.
                        return unsafe { File::from_raw_fd(fds[0]) };
                    }
                }
                panic!("response carried no file descriptor");
            },
            Err(nix::errno::Errno::EAGAIN) => continue,
            Err(e) => panic!("recvmsg failed: {e}"),
        }
    }
}
