use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{CompactionOutcome, CompactionType};
use crate::{
    engine::{RemoteCompactionPolicy, TabletId},
    error::*,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Queued,
    Running,
}

impl RunState {
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, RunState::Idle)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletedRun {
    pub run_id: u64,
    pub remote: bool,
    pub started_ms: Option<u64>,
    pub finished_ms: u64,
    pub outcome: CompactionOutcome,
}

///
/// State of one compaction slot of a tablet: what is in flight right now and how the
/// last run ended.
///
#[derive(Clone, Debug, Default, Serialize)]
pub struct CompactionStatusRecord {
    pub state: RunState,
    pub run_id: Option<u64>,
    pub remote: bool,
    pub submitted_ms: Option<u64>,
    pub started_ms: Option<u64>,
    pub last_run: Option<CompletedRun>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InFlightCompaction {
    pub tablet_id: TabletId,
    pub compact_type: CompactionType,
    pub remote: bool,
    pub state: RunState,
    pub run_id: u64,
}

/// Key of the at-most-one-run invariant. `remote` is only part of the key when remote
/// and local runs are tracked independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RunSlot {
    tablet: TabletId,
    kind: CompactionType,
    remote: Option<bool>,
}

/// Handed out when a run is admitted; needed to move that run's record along.
#[derive(Clone, Debug)]
pub struct RunTicket {
    slot: RunSlot,
    run_id: u64,
    remote: bool,
    submitted_ms: u64,
    previous: Option<CompactionStatusRecord>,
}

impl RunTicket {
    pub fn tablet_id(&self) -> TabletId {
        self.slot.tablet
    }

    pub fn compact_type(&self) -> CompactionType {
        self.slot.kind
    }

    pub fn remote(&self) -> bool {
        self.remote
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn submitted_ms(&self) -> u64 {
        self.submitted_ms
    }
}

pub(crate) struct StatusTable {
    policy: RemoteCompactionPolicy,
    next_run_id: AtomicU64,
    records: Mutex<HashMap<RunSlot, CompactionStatusRecord>>,
}

impl StatusTable {
    pub(crate) fn new(policy: RemoteCompactionPolicy) -> Self {
        Self {
            policy,
            next_run_id: AtomicU64::new(1),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, tablet: TabletId, kind: CompactionType, remote: bool) -> RunSlot {
        let remote = match self.policy {
            RemoteCompactionPolicy::Shared => None,
            RemoteCompactionPolicy::Independent => Some(remote),
        };
        RunSlot {
            tablet,
            kind,
            remote,
        }
    }

    ///
    /// Check-and-mark in a single critical section: either the slot was idle and is now
    /// queued under a fresh run id, or it is already in flight and nothing changes.
    ///
    pub(crate) fn try_begin(
        &self,
        tablet: TabletId,
        kind: CompactionType,
        remote: bool,
        now_ms: u64,
    ) -> Result<RunTicket> {
        let slot = self.slot(tablet, kind, remote);
        let mut records = self.records.lock();
        let previous = records.get(&slot).cloned();
        if let Some(current) = previous.as_ref().filter(|r| r.state.is_in_flight()) {
            return Err(Error::AlreadyRunning(format!(
                "{} compaction of tablet {} is already {} (run {})",
                kind,
                tablet,
                if current.state == RunState::Running {
                    "running"
                } else {
                    "queued"
                },
                current.run_id.unwrap_or_default()
            )));
        }
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let record = records.entry(slot).or_default();
        record.state = RunState::Queued;
        record.run_id = Some(run_id);
        record.remote = remote;
        record.submitted_ms = Some(now_ms);
        record.started_ms = None;
        Ok(RunTicket {
            slot,
            run_id,
            remote,
            submitted_ms: now_ms,
            previous,
        })
    }

    /// Put the slot back the way it was before `ticket` was issued.
    pub(crate) fn revert(&self, ticket: &RunTicket) {
        let mut records = self.records.lock();
        if !Self::owns(&records, ticket) {
            return;
        }
        match &ticket.previous {
            Some(previous) => {
                records.insert(ticket.slot, previous.clone());
            }
            None => {
                records.remove(&ticket.slot);
            }
        }
    }

    pub(crate) fn mark_running(&self, ticket: &RunTicket, now_ms: u64) -> Result<()> {
        let mut records = self.records.lock();
        let record = Self::owned_record(&mut records, ticket)?;
        record.state = RunState::Running;
        record.started_ms = Some(now_ms);
        Ok(())
    }

    pub(crate) fn finish(
        &self,
        ticket: &RunTicket,
        outcome: CompactionOutcome,
        now_ms: u64,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let record = Self::owned_record(&mut records, ticket)?;
        record.last_run = Some(CompletedRun {
            run_id: ticket.run_id,
            remote: ticket.remote,
            started_ms: record.started_ms,
            finished_ms: now_ms,
            outcome,
        });
        record.state = RunState::Idle;
        record.run_id = None;
        record.submitted_ms = None;
        record.started_ms = None;
        Ok(())
    }

    pub(crate) fn get(
        &self,
        tablet: TabletId,
        kind: CompactionType,
        remote: bool,
    ) -> CompactionStatusRecord {
        let slot = self.slot(tablet, kind, remote);
        self.records.lock().get(&slot).cloned().unwrap_or_default()
    }

    pub(crate) fn in_flight(&self) -> Vec<InFlightCompaction> {
        let records = self.records.lock();
        let mut running = records
            .iter()
            .filter(|(_, record)| record.state.is_in_flight())
            .map(|(slot, record)| InFlightCompaction {
                tablet_id: slot.tablet,
                compact_type: slot.kind,
                remote: record.remote,
                state: record.state,
                run_id: record.run_id.unwrap_or_default(),
            })
            .collect::<Vec<_>>();
        running.sort_by_key(|r| (r.compact_type, r.tablet_id, r.remote));
        running
    }

    pub(crate) fn remove_tablet(&self, tablet: TabletId) {
        self.records.lock().retain(|slot, _| slot.tablet != tablet);
    }

    fn owns(records: &HashMap<RunSlot, CompactionStatusRecord>, ticket: &RunTicket) -> bool {
        records
            .get(&ticket.slot)
            .map(|r| r.run_id == Some(ticket.run_id))
            .unwrap_or(false)
    }

    fn owned_record<'a>(
        records: &'a mut HashMap<RunSlot, CompactionStatusRecord>,
        ticket: &RunTicket,
    ) -> Result<&'a mut CompactionStatusRecord> {
        records
            .get_mut(&ticket.slot)
            .filter(|r| r.run_id == Some(ticket.run_id))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no status record for run {} of {} compaction on tablet {}",
                    ticket.run_id, ticket.slot.kind, ticket.slot.tablet
                ))
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::compaction::CompactionStats;
    use crate::engine::Version;

    fn success() -> CompactionOutcome {
        CompactionOutcome::Success {
            stats: CompactionStats {
                input_rowsets: 2,
                input_rows: 20,
                input_bytes: 200,
                output_version: Version::new(0, 1),
                fetched_from_remote: false,
            },
        }
    }

    #[test]
    fn second_begin_is_rejected_until_finish() {
        let table = StatusTable::new(RemoteCompactionPolicy::Shared);
        let ticket = table
            .try_begin(TabletId(1), CompactionType::Base, false, 10)
            .unwrap();
        let err = table
            .try_begin(TabletId(1), CompactionType::Base, false, 11)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
        // other categories are independent
        table
            .try_begin(TabletId(1), CompactionType::Cumulative, false, 11)
            .unwrap();

        table.mark_running(&ticket, 12).unwrap();
        assert_eq!(
            table.get(TabletId(1), CompactionType::Base, false).state,
            RunState::Running
        );
        table.finish(&ticket, success(), 13).unwrap();

        let record = table.get(TabletId(1), CompactionType::Base, false);
        assert_eq!(record.state, RunState::Idle);
        let last = record.last_run.unwrap();
        assert_eq!(last.run_id, ticket.run_id());
        assert_eq!(last.started_ms, Some(12));
        assert!(last.outcome.is_success());
        table
            .try_begin(TabletId(1), CompactionType::Base, false, 14)
            .unwrap();
    }

    #[test]
    fn revert_restores_previous_record() {
        let table = StatusTable::new(RemoteCompactionPolicy::Shared);
        let first = table
            .try_begin(TabletId(1), CompactionType::Full, false, 1)
            .unwrap();
        table.finish(&first, success(), 2).unwrap();

        let second = table
            .try_begin(TabletId(1), CompactionType::Full, false, 3)
            .unwrap();
        table.revert(&second);
        let record = table.get(TabletId(1), CompactionType::Full, false);
        assert_eq!(record.state, RunState::Idle);
        assert_eq!(record.last_run.unwrap().run_id, first.run_id());

        let fresh = table
            .try_begin(TabletId(2), CompactionType::Full, false, 4)
            .unwrap();
        table.revert(&fresh);
        assert!(table.in_flight().is_empty());
    }

    #[test]
    fn remote_policy_decides_exclusivity() {
        let shared = StatusTable::new(RemoteCompactionPolicy::Shared);
        shared
            .try_begin(TabletId(1), CompactionType::Cumulative, false, 1)
            .unwrap();
        assert!(shared
            .try_begin(TabletId(1), CompactionType::Cumulative, true, 1)
            .is_err());

        let independent = StatusTable::new(RemoteCompactionPolicy::Independent);
        independent
            .try_begin(TabletId(1), CompactionType::Cumulative, false, 1)
            .unwrap();
        independent
            .try_begin(TabletId(1), CompactionType::Cumulative, true, 1)
            .unwrap();
        assert_eq!(independent.in_flight().len(), 2);
    }

    #[test]
    fn finishing_a_removed_tablet_fails() {
        let table = StatusTable::new(RemoteCompactionPolicy::Shared);
        let ticket = table
            .try_begin(TabletId(9), CompactionType::Base, false, 1)
            .unwrap();
        table.remove_tablet(TabletId(9));
        assert!(matches!(
            table.finish(&ticket, success(), 2),
            Err(Error::NotFound(_))
        ));
    }
}
