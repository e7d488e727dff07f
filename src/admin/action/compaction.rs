use serde::Serialize;
use std::{
    any::Any,
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use super::{parse_compaction_type, parse_remote, parse_table_id, parse_tablet_id};
use crate::{
    admin::{HttpHandler, HttpRequest, HttpResponse, Privilege},
    engine::{
        compaction::{
            CompactionOutcome, CompactionStatusRecord, CompactionType, InFlightCompaction,
            RunTicket,
        },
        now_ms, CompactionHistory, RemoteCompactionPolicy, StorageEngine, Tablet, TabletId,
    },
    error::*,
    exec_env::ExecEnv,
};

/// What a registered [`CompactionAction`] does. Fixed for the lifetime of the action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionActionType {
    /// Compaction state of one tablet, or a summary of all tablets.
    ShowInfo,
    /// Trigger a compaction in the background.
    RunCompaction,
    /// Whether a triggered compaction is still in flight, and how the last one ended.
    RunCompactionStatus,
}

///
/// Admin action for viewing and triggering tablet compaction.
///
/// Triggering only admits the run (at most one per tablet and compaction type) and hands
/// it to the compaction pool of the [`ExecEnv`]; the request returns before the
/// compaction does. Progress and the outcome are read back through
/// [`CompactionActionType::RunCompactionStatus`].
///
pub struct CompactionAction {
    kind: CompactionActionType,
    exec_env: Arc<ExecEnv>,
    engine: Arc<StorageEngine>,
    privilege: Privilege,
}

#[derive(Serialize)]
struct TabletCompactionInfo {
    tablet_id: TabletId,
    table_id: i64,
    remote_storage: Option<String>,
    cumulative_point: i64,
    max_version: i64,
    compactions: BTreeMap<CompactionType, CompactionTypeInfo>,
    rowsets: Vec<String>,
}

#[derive(Serialize)]
struct CompactionTypeInfo {
    #[serde(flatten)]
    history: CompactionHistory,
    status: CompactionStatusRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_status: Option<CompactionStatusRecord>,
}

#[derive(Serialize)]
struct TabletSummary {
    tablet_id: TabletId,
    table_id: i64,
    rowsets: usize,
    cumulative_point: i64,
    in_flight: Vec<CompactionType>,
}

#[derive(Serialize)]
struct ShowAll {
    remote_policy: RemoteCompactionPolicy,
    tablets: Vec<TabletSummary>,
}

#[derive(Serialize)]
struct RunAccepted {
    status: &'static str,
    msg: &'static str,
    tablet_id: TabletId,
    compact_type: CompactionType,
    remote: bool,
    run_id: u64,
}

#[derive(Serialize)]
struct TabletTrigger {
    tablet_id: TabletId,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    msg: String,
}

#[derive(Serialize)]
struct TableRunAccepted {
    status: &'static str,
    table_id: i64,
    compact_type: CompactionType,
    remote: bool,
    tablets: Vec<TabletTrigger>,
}

#[derive(Serialize)]
struct RunStatus {
    status: &'static str,
    run_status: bool,
    msg: &'static str,
    tablet_id: TabletId,
    compact_type: CompactionType,
    #[serde(flatten)]
    record: CompactionStatusRecord,
}

#[derive(Serialize)]
struct RunningCompactions {
    status: &'static str,
    compactions: BTreeMap<CompactionType, Vec<InFlightCompaction>>,
}

const TRIGGERED_MSG: &str = "compaction task is successfully triggered.";

impl CompactionAction {
    pub fn new(
        kind: CompactionActionType,
        exec_env: Arc<ExecEnv>,
        engine: Arc<StorageEngine>,
        privilege: Privilege,
    ) -> Self {
        Self {
            kind,
            exec_env,
            engine,
            privilege,
        }
    }

    /// Runs the request on the calling thread and returns the JSON body.
    pub fn handle_request(&self, req: &HttpRequest) -> Result<String> {
        match self.kind {
            CompactionActionType::ShowInfo => self.handle_show_compaction(req),
            CompactionActionType::RunCompaction => self.handle_run_compaction(req),
            CompactionActionType::RunCompactionStatus => self.handle_run_status_compaction(req),
        }
    }

    fn handle_show_compaction(&self, req: &HttpRequest) -> Result<String> {
        if let Some(id) = parse_tablet_id(req)? {
            let tablet = self.engine.tablet(id)?;
            return Ok(serde_json::to_string_pretty(&self.tablet_info(&tablet))?);
        }
        let running = self.engine.running_compactions();
        let tablets = self
            .engine
            .tablets()
            .iter()
            .map(|tablet| TabletSummary {
                tablet_id: tablet.id(),
                table_id: tablet.table_id(),
                rowsets: tablet.num_rowsets(),
                cumulative_point: tablet.cumulative_point(),
                in_flight: running
                    .iter()
                    .filter(|r| r.tablet_id == tablet.id())
                    .map(|r| r.compact_type)
                    .collect(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&ShowAll {
            remote_policy: self.engine.remote_policy(),
            tablets,
        })?)
    }

    fn tablet_info(&self, tablet: &Tablet) -> TabletCompactionInfo {
        let independent = self.engine.remote_policy() == RemoteCompactionPolicy::Independent;
        let compactions = CompactionType::ALL
            .into_iter()
            .map(|kind| {
                let info = CompactionTypeInfo {
                    history: tablet.history(kind),
                    status: self.engine.compaction_status(tablet.id(), kind, false),
                    remote_status: independent
                        .then(|| self.engine.compaction_status(tablet.id(), kind, true)),
                };
                (kind, info)
            })
            .collect();
        let rowsets = tablet
            .rowsets()
            .iter()
            .map(|r| {
                format!(
                    "{} {} rows {} bytes {} segments {}",
                    r.version,
                    r.num_rows,
                    r.data_size,
                    r.num_segments,
                    if r.overlapping {
                        "OVERLAPPING"
                    } else {
                        "NONOVERLAPPING"
                    }
                )
            })
            .collect();
        TabletCompactionInfo {
            tablet_id: tablet.id(),
            table_id: tablet.table_id(),
            remote_storage: tablet.remote_storage().map(str::to_string),
            cumulative_point: tablet.cumulative_point(),
            max_version: tablet.max_version(),
            compactions,
            rowsets,
        }
    }

    ///
    /// Validate, admit and submit. Either `tablet_id` or `table_id` names the target; a
    /// table triggers every one of its tablets and reports per tablet.
    ///
    fn handle_run_compaction(&self, req: &HttpRequest) -> Result<String> {
        let kind = parse_compaction_type(req)?;
        let remote = parse_remote(req)?;
        let tablet_id = parse_tablet_id(req)?;
        let table_id = parse_table_id(req)?;

        if let Some(id) = tablet_id {
            if table_id.is_some() {
                return Err(Error::InvalidArgument(String::from(
                    "tablet_id and table_id are mutually exclusive",
                )));
            }
            let tablet = self.engine.tablet(id)?;
            let ticket = self.submit_compaction(tablet, kind, remote)?;
            return Ok(serde_json::to_string_pretty(&RunAccepted {
                status: "Success",
                msg: TRIGGERED_MSG,
                tablet_id: id,
                compact_type: kind,
                remote,
                run_id: ticket.run_id(),
            })?);
        }

        let table_id = table_id
            .ok_or_else(|| Error::NotFound(String::from("missing tablet_id or table_id")))?;
        let tablets = self.engine.tablets_of_table(table_id);
        if tablets.is_empty() {
            return Err(Error::NotFound(format!("no tablets for table {}", table_id)));
        }
        let tablets = tablets
            .into_iter()
            .map(|tablet| {
                let tablet_id = tablet.id();
                match self.submit_compaction(tablet, kind, remote) {
                    Ok(ticket) => TabletTrigger {
                        tablet_id,
                        accepted: true,
                        run_id: Some(ticket.run_id()),
                        kind: None,
                        msg: String::from(TRIGGERED_MSG),
                    },
                    Err(e) => TabletTrigger {
                        tablet_id,
                        accepted: false,
                        run_id: None,
                        kind: Some(e.kind()),
                        msg: e.message(),
                    },
                }
            })
            .collect();
        Ok(serde_json::to_string_pretty(&TableRunAccepted {
            status: "Success",
            table_id,
            compact_type: kind,
            remote,
            tablets,
        })?)
    }

    fn submit_compaction(
        &self,
        tablet: Arc<Tablet>,
        kind: CompactionType,
        remote: bool,
    ) -> Result<RunTicket> {
        let ticket = self.engine.try_begin_compaction(&tablet, kind, remote)?;
        let engine = Arc::clone(&self.engine);
        let job_tablet = Arc::clone(&tablet);
        let job_ticket = ticket.clone();
        let submitted = self
            .exec_env
            .compaction_pool()
            .submit(move || Self::execute_compaction_callback(engine, job_tablet, job_ticket));
        if let Err(e) = submitted {
            self.engine.revert_compaction(&ticket);
            log::warn!(
                "Unable to submit {} compaction of tablet {}: {}",
                kind,
                ticket.tablet_id(),
                e
            );
            return Err(e);
        }
        self.engine.confirm_compaction(&tablet, &ticket);
        log::info!(
            "Triggered {} compaction of tablet {} (run {}, remote: {})",
            kind,
            ticket.tablet_id(),
            ticket.run_id(),
            remote
        );
        Ok(ticket)
    }

    ///
    /// Body of the background job. Owns its own tablet handle so the tablet outlives the
    /// request. Nothing escapes: errors and panics become the recorded outcome, and a
    /// record that can no longer be updated is only logged.
    ///
    fn execute_compaction_callback(
        engine: Arc<StorageEngine>,
        tablet: Arc<Tablet>,
        ticket: RunTicket,
    ) {
        let kind = ticket.compact_type();
        if let Err(e) = engine.mark_compaction_running(&ticket) {
            log::warn!(
                "Skipping {} compaction of tablet {}, run {} is gone: {}",
                kind,
                tablet.id(),
                ticket.run_id(),
                e
            );
            return;
        }

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            engine.compact(&tablet, kind, ticket.remote())
        }))
        .unwrap_or_else(|panic| {
            let err = Error::Internal(format!(
                "compaction panicked: {}",
                panic_message(&*panic)
            ));
            if let Ok(now) = now_ms() {
                tablet.record_failure(kind, now, &err);
            }
            Err(err)
        });
        match &result {
            Ok(stats) => log::info!(
                "Finished {} compaction of tablet {} in {:?}: {} rowsets into {}",
                kind,
                tablet.id(),
                started.elapsed(),
                stats.input_rowsets,
                stats.output_version
            ),
            Err(e) => log::warn!(
                "Failed {} compaction of tablet {} after {:?}: {}",
                kind,
                tablet.id(),
                started.elapsed(),
                e
            ),
        }

        if let Err(e) = engine.finish_compaction(&ticket, CompactionOutcome::from(result)) {
            log::warn!(
                "Unable to record outcome of {} compaction of tablet {}: {}",
                kind,
                tablet.id(),
                e
            );
        }
    }

    fn handle_run_status_compaction(&self, req: &HttpRequest) -> Result<String> {
        let Some(id) = parse_tablet_id(req)? else {
            let mut compactions = CompactionType::ALL
                .into_iter()
                .map(|kind| (kind, Vec::new()))
                .collect::<BTreeMap<_, _>>();
            for running in self.engine.running_compactions() {
                compactions
                    .entry(running.compact_type)
                    .or_default()
                    .push(running);
            }
            return Ok(serde_json::to_string_pretty(&RunningCompactions {
                status: "Success",
                compactions,
            })?);
        };

        let tablet = self.engine.tablet(id)?;
        let kind = parse_compaction_type(req)?;
        let remote = parse_remote(req)?;
        let record = self.engine.compaction_status(tablet.id(), kind, remote);
        let run_status = record.state.is_in_flight();
        Ok(serde_json::to_string_pretty(&RunStatus {
            status: "Success",
            run_status,
            msg: if run_status {
                "compaction task for this tablet is running"
            } else {
                "compaction task for this tablet is not running"
            },
            tablet_id: id,
            compact_type: kind,
            record,
        })?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("unknown panic")
    }
}

impl HttpHandler for CompactionAction {
    fn handle(&self, req: &HttpRequest) -> HttpResponse {
        let result = self.handle_request(req);
        if let Err(e) = &result {
            match e.kind() {
                ErrorKind::Internal | ErrorKind::Unavailable => {
                    log::warn!("{:?} on {} failed: {}", self.kind, req.path(), e)
                }
                _ => log::debug!("{:?} on {} rejected: {}", self.kind, req.path(), e),
            }
        }
        result.into()
    }

    fn privilege(&self) -> Option<Privilege> {
        Some(self.privilege)
    }
}
