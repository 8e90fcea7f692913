//! A family that is not enabled in configuration must reject every
//! operation with an unavailable error, while the remaining families keep
//! working.

mod common;

use std::collections::BTreeMap;

use common::{request, spawn_daemon, test_config, write_stub_collector};
use dumpd_core::entry::DumpFamily;
use dumpd_core::ipc::{IpcErrorKind, IpcRequest, IpcResponse};
use tempfile::TempDir;

#[tokio::test]
async fn test_disabled_family_rejects_operations() {
    let root = TempDir::new().unwrap();
    let collector = write_stub_collector(root.path());
    let mut config = test_config(root.path(), &collector);
    config.fdr.common.enabled = false;

    let daemon = spawn_daemon(root, config).await;
    let mut stream = daemon.connect().await;

    for req in [
        IpcRequest::CreateDump {
            family: DumpFamily::Fdr,
            params: BTreeMap::new(),
        },
        IpcRequest::ListEntries {
            family: DumpFamily::Fdr,
        },
        IpcRequest::GetEntry {
            family: DumpFamily::Fdr,
            id: 1,
        },
        IpcRequest::DeleteEntry {
            family: DumpFamily::Fdr,
            id: 1,
        },
    ] {
        let response = request(&mut stream, &req).await;
        match response {
            IpcResponse::Error { kind, message } => {
                assert_eq!(kind, IpcErrorKind::Unavailable);
                assert!(message.contains("not enabled"));
            },
            other => panic!("expected unavailable for {req:?}, got {other:?}"),
        }
    }

    // The other families are unaffected.
    let response = request(&mut stream, &IpcRequest::Status).await;
    match response {
        IpcResponse::Status { families, .. } => {
            assert_eq!(families.len(), 3);
            assert!(families.iter().all(|f| f.family != DumpFamily::Fdr));
        },
        other => panic!("expected status, got {other:?}"),
    }

    daemon.shutdown();
}
