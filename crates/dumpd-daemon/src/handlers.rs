//! Request dispatch onto the engine.
//!
//! Converts bus requests into manager operations and engine errors back
//! into wire error kinds. This is the only layer that translates the
//! `DumpError` taxonomy into responses.

use std::collections::BTreeMap;
use std::fs::File;

use dumpd_core::entry::DumpFamily;
use dumpd_core::error::DumpError;
use dumpd_core::ipc::{EntryInfo, IpcRequest, IpcResponse};
use dumpd_core::manager::{
    CreateParams, FamilyManager, FamilyPolicy, PARAM_ORIGINATOR_ID, PARAM_ORIGINATOR_TYPE,
};
use tracing::error;

use crate::state::{Engine, SharedEngine};
use crate::tasks::{self, Select};

/// A dispatched response, optionally carrying a descriptor to pass as
/// ancillary data after the response frame.
pub struct DispatchOutcome {
    /// The response frame.
    pub response: IpcResponse,
    /// Descriptor to send with SCM_RIGHTS, for `GetFileHandle`.
    pub fd: Option<File>,
}

impl From<IpcResponse> for DispatchOutcome {
    fn from(response: IpcResponse) -> Self {
        Self { response, fd: None }
    }
}

/// Handle one request against the shared engine.
pub async fn dispatch(request: IpcRequest, state: &SharedEngine) -> DispatchOutcome {
    match request {
        IpcRequest::CreateDump { family, params } => {
            let params = CreateParams::new(params);
            let mut engine = state.write().await;
            match family {
                DumpFamily::Bmc => create(state, &mut engine, family, Engine::bmc_mut, &params),
                DumpFamily::System => {
                    create(state, &mut engine, family, Engine::system_mut, &params)
                },
                DumpFamily::FaultLog => {
                    create(state, &mut engine, family, Engine::faultlog_mut, &params)
                },
                DumpFamily::Fdr => create(state, &mut engine, family, Engine::fdr_mut, &params),
            }
            .into()
        },

        IpcRequest::ListEntries { family } => {
            let engine = state.read().await;
            match family {
                DumpFamily::Bmc => list(engine.bmc.as_ref(), family),
                DumpFamily::System => list(engine.system.as_ref(), family),
                DumpFamily::FaultLog => list(engine.faultlog.as_ref(), family),
                DumpFamily::Fdr => list(engine.fdr.as_ref(), family),
            }
            .into()
        },

        IpcRequest::GetEntry { family, id } => {
            let engine = state.read().await;
            match family {
                DumpFamily::Bmc => get(engine.bmc.as_ref(), family, id),
                DumpFamily::System => get(engine.system.as_ref(), family, id),
                DumpFamily::FaultLog => get(engine.faultlog.as_ref(), family, id),
                DumpFamily::Fdr => get(engine.fdr.as_ref(), family, id),
            }
            .into()
        },

        IpcRequest::DeleteEntry { family, id } => {
            let mut engine = state.write().await;
            match family {
                DumpFamily::Bmc => delete(engine.bmc.as_mut(), family, id),
                DumpFamily::System => delete(engine.system.as_mut(), family, id),
                DumpFamily::FaultLog => delete(engine.faultlog.as_mut(), family, id),
                DumpFamily::Fdr => delete(engine.fdr.as_mut(), family, id),
            }
            .into()
        },

        IpcRequest::InitiateOffload { family, id, uri } => {
            let mut engine = state.write().await;
            match family {
                DumpFamily::Bmc => offload(engine.bmc.as_mut(), family, id, uri),
                DumpFamily::System => offload(engine.system.as_mut(), family, id, uri),
                DumpFamily::FaultLog => offload(engine.faultlog.as_mut(), family, id, uri),
                DumpFamily::Fdr => offload(engine.fdr.as_mut(), family, id, uri),
            }
            .into()
        },

        IpcRequest::GetFileHandle { family, id } => {
            let engine = state.read().await;
            match family {
                DumpFamily::Bmc => file_handle(engine.bmc.as_ref(), family, id),
                DumpFamily::System => file_handle(engine.system.as_ref(), family, id),
                DumpFamily::FaultLog => file_handle(engine.faultlog.as_ref(), family, id),
                DumpFamily::Fdr => file_handle(engine.fdr.as_ref(), family, id),
            }
        },

        IpcRequest::NotifyErrorLog { id, message } => {
            notify_error_log(state, id, &message).await.into()
        },

        IpcRequest::GetRetimerDebugMode => {
            let engine = state.read().await;
            match &engine.system {
                Some(mgr) => {
                    let retimer = mgr.policy().retimer();
                    IpcResponse::RetimerDebugMode {
                        enabled: retimer.is_enabled(),
                        vendor_id: retimer.vendor_id().map(str::to_string),
                    }
                },
                None => disabled(DumpFamily::System),
            }
            .into()
        },

        IpcRequest::SetRetimerVendorId { vendor_id } => {
            let mut engine = state.write().await;
            match engine.system.as_mut() {
                Some(mgr) => {
                    mgr.policy_mut().set_retimer_vendor_id(vendor_id);
                    IpcResponse::Ack
                },
                None => disabled(DumpFamily::System),
            }
            .into()
        },

        IpcRequest::Status => {
            let engine = state.read().await;
            IpcResponse::Status {
                uptime_secs: state.uptime_secs(),
                families: engine.family_status(),
            }
            .into()
        },
    }
}

fn disabled(family: DumpFamily) -> IpcResponse {
    IpcResponse::from_error(&DumpError::Unavailable(format!(
        "{family} dump family is not enabled"
    )))
}

fn create<P: FamilyPolicy>(
    state: &SharedEngine,
    engine: &mut Engine,
    family: DumpFamily,
    select: Select<P>,
    params: &CreateParams,
) -> IpcResponse {
    let Some(mgr) = select(engine) else {
        return disabled(family);
    };
    match mgr.create_dump(params) {
        Ok(created) => {
            tasks::supervise_collector(state.clone(), select, created.id, created.collector);
            IpcResponse::DumpCreated {
                object_path: created.object_path,
            }
        },
        Err(e) => IpcResponse::from_error(&e),
    }
}

fn list<P: FamilyPolicy>(mgr: Option<&FamilyManager<P>>, family: DumpFamily) -> IpcResponse {
    match mgr {
        Some(mgr) => IpcResponse::Entries {
            entries: mgr
                .catalog()
                .iter()
                .map(|e| EntryInfo::from_entry(family, e))
                .collect(),
        },
        None => disabled(family),
    }
}

fn get<P: FamilyPolicy>(
    mgr: Option<&FamilyManager<P>>,
    family: DumpFamily,
    id: u32,
) -> IpcResponse {
    let Some(mgr) = mgr else {
        return disabled(family);
    };
    match mgr.catalog().get(id) {
        Some(entry) => IpcResponse::Entry {
            entry: EntryInfo::from_entry(family, entry),
        },
        None => IpcResponse::from_error(&DumpError::NotFound(id)),
    }
}

fn delete<P: FamilyPolicy>(
    mgr: Option<&mut FamilyManager<P>>,
    family: DumpFamily,
    id: u32,
) -> IpcResponse {
    let Some(mgr) = mgr else {
        return disabled(family);
    };
    match mgr.delete_entry(id) {
        Ok(()) => IpcResponse::Deleted,
        Err(e) => IpcResponse::from_error(&e),
    }
}

fn offload<P: FamilyPolicy>(
    mgr: Option<&mut FamilyManager<P>>,
    family: DumpFamily,
    id: u32,
    uri: String,
) -> IpcResponse {
    let Some(mgr) = mgr else {
        return disabled(family);
    };
    match mgr.initiate_offload(id, uri.clone()) {
        Ok(()) => IpcResponse::OffloadInitiated { uri },
        Err(e) => IpcResponse::from_error(&e),
    }
}

fn file_handle<P: FamilyPolicy>(
    mgr: Option<&FamilyManager<P>>,
    family: DumpFamily,
    id: u32,
) -> DispatchOutcome {
    let Some(mgr) = mgr else {
        return disabled(family).into();
    };
    match mgr.file_handle(id) {
        Ok(file) => {
            let size = file.metadata().map(|m| m.len()).unwrap_or_default();
            DispatchOutcome {
                response: IpcResponse::FileHandle { size },
                fd: Some(file),
            }
        },
        Err(e) => IpcResponse::from_error(&e).into(),
    }
}

/// React to a new external error-log object.
///
/// Allowlisted messages trigger a BMC dump of the matching category; the
/// log id is then recorded so restarts do not duplicate the dump.
async fn notify_error_log(state: &SharedEngine, log_id: u32, message: &str) -> IpcResponse {
    let mut engine = state.write().await;
    let Some(kind) = engine.elog.classify(log_id, message) else {
        return IpcResponse::Ack;
    };

    let mut map = BTreeMap::new();
    map.insert(PARAM_ORIGINATOR_TYPE.to_string(), "Internal".to_string());
    map.insert(PARAM_ORIGINATOR_ID.to_string(), format!("error-log-{log_id}"));
    let params = CreateParams::new(map);

    let created = match engine.bmc_mut() {
        Some(mgr) => mgr.create_dump_with(&params, kind),
        None => return disabled(DumpFamily::Bmc),
    };

    match created {
        Ok(created) => {
            tasks::supervise_collector(
                state.clone(),
                Engine::bmc_mut,
                created.id,
                created.collector,
            );
            if let Err(e) = engine.elog.record(log_id) {
                error!(log_id, error = %e, "failed to persist error-log id set");
            }
            IpcResponse::DumpCreated {
                object_path: created.object_path,
            }
        },
        Err(e) => IpcResponse::from_error(&e),
    }
}
