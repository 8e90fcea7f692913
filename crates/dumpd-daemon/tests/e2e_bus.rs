//! End-to-end bus tests: a full in-process daemon (managers, watchers,
//! pumps, socket server) driven through the wire protocol, with stub
//! collectors standing in for the real ones.

mod common;

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use common::{
    recv_fd, request, spawn_daemon, test_config, write_stub_collector, TestDaemon, TEST_TIMEOUT,
};
use dumpd_core::entry::{DumpFamily, OperationStatus};
use dumpd_core::ipc::{EntryInfo, IpcErrorKind, IpcRequest, IpcResponse};
use tempfile::TempDir;
use tokio::net::UnixStream;

async fn stub_daemon() -> TestDaemon {
    let root = TempDir::new().unwrap();
    let collector = write_stub_collector(root.path());
    let config = test_config(root.path(), &collector);
    spawn_daemon(root, config).await
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Poll until the entry reaches a terminal state.
async fn wait_for_completion(
    stream: &mut UnixStream,
    family: DumpFamily,
    id: u32,
) -> EntryInfo {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let response = request(stream, &IpcRequest::GetEntry { family, id }).await;
        if let IpcResponse::Entry { entry } = &response {
            if entry.status.is_terminal() {
                return entry.clone();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "entry {family}/{id} never completed: {response:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_bmc_create_complete_offload_delete_cycle() {
    let daemon = stub_daemon().await;
    let mut stream = daemon.connect().await;

    // Create.
    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::Bmc,
            params: params(&[("OriginatorId", "test-client")]),
        },
    )
    .await;
    let path = match response {
        IpcResponse::DumpCreated { object_path } => object_path.unwrap(),
        other => panic!("create failed: {other:?}"),
    };
    assert_eq!(path, "/dump/bmc/entry/1");

    // The watcher completes the entry once the stub payload lands.
    let entry = wait_for_completion(&mut stream, DumpFamily::Bmc, 1).await;
    assert_eq!(entry.status, OperationStatus::Completed);
    assert_eq!(entry.size, 4096);
    assert_eq!(entry.progress, 100);
    assert_eq!(entry.originator_id, "test-client");
    assert!(entry.file.ends_with("obmcdump_1_1700000000.tar.xz"));

    // Offload intent.
    let response = request(
        &mut stream,
        &IpcRequest::InitiateOffload {
            family: DumpFamily::Bmc,
            id: 1,
            uri: "nfs://host/dumps/1".to_string(),
        },
    )
    .await;
    assert!(matches!(response, IpcResponse::OffloadInitiated { .. }));

    // File handle: response frame, then the descriptor.
    let response = request(
        &mut stream,
        &IpcRequest::GetFileHandle {
            family: DumpFamily::Bmc,
            id: 1,
        },
    )
    .await;
    match response {
        IpcResponse::FileHandle { size } => assert_eq!(size, 4096),
        other => panic!("expected file handle, got {other:?}"),
    }
    let mut file = recv_fd(&stream).await;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).unwrap();
    assert_eq!(contents.len(), 4096);

    // Delete.
    let response = request(
        &mut stream,
        &IpcRequest::DeleteEntry {
            family: DumpFamily::Bmc,
            id: 1,
        },
    )
    .await;
    assert!(matches!(response, IpcResponse::Deleted));

    let response = request(
        &mut stream,
        &IpcRequest::ListEntries {
            family: DumpFamily::Bmc,
        },
    )
    .await;
    match response {
        IpcResponse::Entries { entries } => assert!(entries.is_empty()),
        other => panic!("expected listing, got {other:?}"),
    }

    daemon.shutdown();
}

#[tokio::test]
async fn test_invalid_system_diagnostic_type() {
    let daemon = stub_daemon().await;
    let mut stream = daemon.connect().await;

    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::System,
            params: params(&[("DiagnosticType", "Bogus")]),
        },
    )
    .await;
    match response {
        IpcResponse::Error { kind, .. } => assert_eq!(kind, IpcErrorKind::InvalidArgument),
        other => panic!("expected error, got {other:?}"),
    }

    daemon.shutdown();
}

#[tokio::test]
async fn test_fdr_requires_diagnostic_type() {
    let daemon = stub_daemon().await;
    let mut stream = daemon.connect().await;

    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::Fdr,
            params: BTreeMap::new(),
        },
    )
    .await;
    match response {
        IpcResponse::Error { kind, .. } => assert_eq!(kind, IpcErrorKind::InvalidArgument),
        other => panic!("expected error, got {other:?}"),
    }

    daemon.shutdown();
}

#[tokio::test]
async fn test_byte_quota_rejection_over_the_bus() {
    let root = TempDir::new().unwrap();
    let collector = write_stub_collector(root.path());
    let mut config = test_config(root.path(), &collector);
    config.bmc.common.total_size_kb = 1000;
    config.bmc.common.min_space_reqd_kb = 100;
    config.bmc.common.rotation = false;

    // Pre-fill the staging root past the cap.
    let staging = &config.bmc.common.dump_path;
    let dir = staging.join("1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("obmcdump_1_1700000000.tar.xz"), vec![0u8; 950 * 1024]).unwrap();

    let daemon = spawn_daemon(root, config).await;
    let mut stream = daemon.connect().await;

    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::Bmc,
            params: BTreeMap::new(),
        },
    )
    .await;
    match response {
        IpcResponse::Error { kind, message } => {
            assert_eq!(kind, IpcErrorKind::QuotaExceeded);
            assert!(message.contains("Not enough space"));
        },
        other => panic!("expected quota error, got {other:?}"),
    }

    // The pre-existing entry is untouched.
    let response = request(
        &mut stream,
        &IpcRequest::ListEntries {
            family: DumpFamily::Bmc,
        },
    )
    .await;
    match response {
        IpcResponse::Entries { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].id, 1);
        },
        other => panic!("expected listing, got {other:?}"),
    }

    daemon.shutdown();
}

#[tokio::test]
async fn test_fdr_collect_produces_entry() {
    let daemon = stub_daemon().await;
    let mut stream = daemon.connect().await;

    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::Fdr,
            params: params(&[("DiagnosticType", "FDR")]),
        },
    )
    .await;
    let path = match response {
        IpcResponse::DumpCreated { object_path } => object_path.unwrap(),
        other => panic!("create failed: {other:?}"),
    };
    assert_eq!(path, "/dump/fdr/entry/1");

    let entry = wait_for_completion(&mut stream, DumpFamily::Fdr, 1).await;
    assert_eq!(entry.status, OperationStatus::Completed);

    daemon.shutdown();
}

#[tokio::test]
async fn test_status_reports_families() {
    let daemon = stub_daemon().await;
    let mut stream = daemon.connect().await;

    let response = request(&mut stream, &IpcRequest::Status).await;
    match response {
        IpcResponse::Status { families, .. } => {
            assert_eq!(families.len(), 4);
        },
        other => panic!("expected status, got {other:?}"),
    }

    daemon.shutdown();
}

#[tokio::test]
async fn test_get_file_handle_before_payload_is_unavailable() {
    let root = TempDir::new().unwrap();
    let collector = common::write_sleeping_collector(root.path());
    let config = test_config(root.path(), &collector);
    let daemon = spawn_daemon(root, config).await;
    let mut stream = daemon.connect().await;

    let response = request(
        &mut stream,
        &IpcRequest::CreateDump {
            family: DumpFamily::Bmc,
            params: BTreeMap::new(),
        },
    )
    .await;
    assert!(matches!(response, IpcResponse::DumpCreated { .. }));

    let response = request(
        &mut stream,
        &IpcRequest::GetFileHandle {
            family: DumpFamily::Bmc,
            id: 1,
        },
    )
    .await;
    match response {
        IpcResponse::Error { kind, .. } => assert_eq!(kind, IpcErrorKind::Unavailable),
        other => panic!("expected unavailable, got {other:?}"),
    }

    daemon.shutdown();
}
