//! Bus socket server.
//!
//! Serves length-prefixed JSON frames on the daemon's Unix socket. The
//! accept loop runs until the engine's shutdown signal fires. A
//! `GetFileHandle` response is followed by one SCM_RIGHTS message carrying
//! the read-only payload descriptor, which is closed as soon as the reply
//! is on the wire.

use std::io::IoSlice;
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::{bail, Context, Result};
use dumpd_core::ipc::{IpcErrorKind, IpcRequest, IpcResponse, MAX_MESSAGE_SIZE};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::handlers::{dispatch, DispatchOutcome};
use crate::state::SharedEngine;

/// Serve the bus socket until shutdown is requested.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn run(socket_path: &Path, state: SharedEngine) -> Result<()> {
    let listener = bind(socket_path)?;
    info!("bus server listening on {:?}", socket_path);

    loop {
        tokio::select! {
            () = state.shutdown_signal() => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("failed to accept bus connection: {e}");
                        continue;
                    },
                };
                tokio::spawn(serve_connection(stream, state.clone()));
            }
        }
    }

    info!("bus server shutting down");
    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create socket directory")?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
    }
    UnixListener::bind(socket_path).context("failed to bind Unix socket")
}

/// Serve one client until it hangs up or a frame cannot be written.
async fn serve_connection(mut stream: UnixStream, state: SharedEngine) {
    loop {
        let payload = match recv_frame(&mut stream).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("bus client disconnected");
                return;
            },
            Err(e) => {
                warn!("dropping bus connection: {e}");
                return;
            },
        };

        // A frame that does not decode to a request still gets an answer;
        // only transport-level failures tear the connection down.
        let outcome = match serde_json::from_slice::<IpcRequest>(&payload) {
            Ok(request) => dispatch(request, &state).await,
            Err(e) => DispatchOutcome::from(IpcResponse::Error {
                kind: IpcErrorKind::InvalidArgument,
                message: format!("malformed request: {e}"),
            }),
        };

        if let Err(e) = reply(&mut stream, &outcome).await {
            warn!("failed to answer bus request: {e}");
            return;
        }
    }
}

/// Read one frame. `Ok(None)` when the client closed the connection at a
/// frame boundary.
async fn recv_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("failed to read frame header"),
    };
    if len > MAX_MESSAGE_SIZE {
        bail!("oversized frame: {len} bytes");
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .context("failed to read frame payload")?;
    Ok(Some(payload))
}

/// Write the response frame, plus the payload descriptor when one is
/// attached.
async fn reply(stream: &mut UnixStream, outcome: &DispatchOutcome) -> Result<()> {
    let json = serde_json::to_vec(&outcome.response).context("failed to serialize response")?;
    stream.write_u32(json.len() as u32).await?;
    stream.write_all(&json).await?;
    stream.flush().await?;

    if let Some(file) = &outcome.fd {
        send_fd(stream, file)
            .await
            .context("failed to pass dump file descriptor")?;
    }
    Ok(())
}

/// Pass a descriptor as SCM_RIGHTS ancillary data on a one-byte carrier.
async fn send_fd(stream: &UnixStream, file: &std::fs::File) -> Result<()> {
    let fds = [file.as_raw_fd()];
    loop {
        stream.writable().await?;
        let iov = [IoSlice::new(b"F")];
        let cmsgs = [ControlMessage::ScmRights(&fds)];
        match sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EAGAIN) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
