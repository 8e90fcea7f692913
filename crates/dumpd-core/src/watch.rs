//! Staging-directory watcher.
//!
//! Surfaces filesystem events under a family's staging root to the manager:
//! `Created` when a subdirectory appears, `CompletedWrite` when a file under
//! a watched subdirectory finishes writing.
//!
//! inotify itself is not recursive; recursion is achieved by arming a child
//! watch for each newly created subdirectory and releasing it when the
//! completion event for that directory fires. Events are read on a dedicated
//! thread and delivered in batches over an unbounded channel, so the async
//! side never blocks on the inotify fd.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::DumpError;

/// Kind of filesystem event delivered to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// A subdirectory was created under the staging root.
    Created,
    /// A file under a watched subdirectory finished writing.
    CompletedWrite,
}

/// One filesystem notification.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Absolute path of the subject.
    pub path: PathBuf,
    /// What happened.
    pub kind: WatchKind,
}

/// Receiver half of a watch: batches of events in kernel order.
pub type WatchReceiver = mpsc::UnboundedReceiver<Vec<WatchEvent>>;

/// Handle to a running staging-directory watch.
///
/// The watch thread runs for the life of the process; dropping the handle
/// only detaches it. Dropping the receiver makes the thread exit after the
/// next event batch.
#[derive(Debug)]
pub struct DumpWatch {
    root: PathBuf,
}

impl DumpWatch {
    /// Start watching `root` and return the event receiver.
    ///
    /// # Errors
    ///
    /// [`DumpError::InvalidArgument`] if `root` is not a directory,
    /// [`DumpError::Internal`] if the kernel watch cannot be armed.
    pub fn spawn(root: &Path) -> Result<(Self, WatchReceiver), DumpError> {
        if !root.is_dir() {
            return Err(DumpError::invalid_argument(
                "watch directory",
                root.display().to_string(),
            ));
        }

        let inotify = Inotify::init(InitFlags::IN_CLOEXEC)
            .map_err(|e| DumpError::Internal(format!("inotify init: {e}")))?;
        let root_wd = inotify
            .add_watch(
                root,
                AddWatchFlags::IN_CREATE | AddWatchFlags::IN_CLOSE_WRITE,
            )
            .map_err(|e| {
                DumpError::Internal(format!("inotify add watch {}: {e}", root.display()))
            })?;

        // Subdirectories that already exist (entry dirs and the BMC
        // category level surviving a restart) get their child watches
        // up front; new ones are armed from their Create events.
        let mut children: HashMap<WatchDescriptor, PathBuf> = HashMap::new();
        if let Ok(iter) = std::fs::read_dir(root) {
            for item in iter.flatten() {
                if item.path().is_dir() {
                    arm_child(&inotify, &mut children, &item.path());
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let thread_root = root.to_path_buf();
        let _thread = std::thread::Builder::new()
            .name("dump-watch".to_string())
            .spawn(move || watch_loop(&inotify, root_wd, &thread_root, children, &tx))
            .map_err(|e| DumpError::Internal(format!("spawn watch thread: {e}")))?;

        Ok((
            Self {
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    /// The watched staging root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn watch_loop(
    inotify: &Inotify,
    root_wd: WatchDescriptor,
    root: &Path,
    mut children: HashMap<WatchDescriptor, PathBuf>,
    tx: &mpsc::UnboundedSender<Vec<WatchEvent>>,
) {
    loop {
        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(e) => {
                error!(root = %root.display(), error = %e, "inotify read failed, stopping watch");
                return;
            },
        };

        let mut batch = Vec::new();
        for event in events {
            if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                warn!(root = %root.display(), "inotify queue overflow, events may be lost");
                continue;
            }

            let dir = if event.wd == root_wd {
                root.to_path_buf()
            } else if let Some(dir) = children.get(&event.wd) {
                dir.clone()
            } else {
                continue;
            };

            let Some(name) = event.name else { continue };
            let path = dir.join(name);
            let is_dir = event.mask.contains(AddWatchFlags::IN_ISDIR);

            if event.mask.contains(AddWatchFlags::IN_CREATE) {
                if is_dir {
                    arm_child(inotify, &mut children, &path);
                    batch.push(WatchEvent {
                        path,
                        kind: WatchKind::Created,
                    });
                }
            } else if event.mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
                if is_dir {
                    release_by_path(inotify, &mut children, &path);
                } else {
                    // The payload is done; the watch on its directory has
                    // served its purpose.
                    if event.wd != root_wd {
                        release_wd(inotify, &mut children, event.wd);
                    }
                    batch.push(WatchEvent {
                        path,
                        kind: WatchKind::CompletedWrite,
                    });
                }
            }
        }

        if !batch.is_empty() && tx.send(batch).is_err() {
            debug!(root = %root.display(), "watch receiver dropped, stopping watch");
            return;
        }
    }
}

fn arm_child(inotify: &Inotify, children: &mut HashMap<WatchDescriptor, PathBuf>, path: &Path) {
    match inotify.add_watch(
        path,
        AddWatchFlags::IN_CREATE | AddWatchFlags::IN_CLOSE_WRITE,
    ) {
        Ok(wd) => {
            debug!(path = %path.display(), "armed child watch");
            children.insert(wd, path.to_path_buf());
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to arm child watch");
        },
    }
}

fn release_wd(
    inotify: &Inotify,
    children: &mut HashMap<WatchDescriptor, PathBuf>,
    wd: WatchDescriptor,
) {
    if let Some(path) = children.remove(&wd) {
        if let Err(e) = inotify.rm_watch(wd) {
            debug!(path = %path.display(), error = %e, "failed to release child watch");
        }
    }
}

fn release_by_path(
    inotify: &Inotify,
    children: &mut HashMap<WatchDescriptor, PathBuf>,
    path: &Path,
) {
    let wd = children
        .iter()
        .find(|(_, p)| p.as_path() == path)
        .map(|(wd, _)| *wd);
    if let Some(wd) = wd {
        release_wd(inotify, children, wd);
    }
}
