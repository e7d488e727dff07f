use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use super::compaction::{
    CompactionOutcome, CompactionStats, CompactionStatusRecord, CompactionType, Compactor,
    InFlightCompaction, RowsetMergeCompactor, RunTicket, StatusTable,
};
use super::{now_ms, Tablet, TabletId};
use crate::error::*;

/// Whether a remote and a local compaction of the same type on the same tablet may run
/// side by side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteCompactionPolicy {
    /// One run per (tablet, type), wherever its data comes from.
    #[default]
    Shared,
    /// Remote and local runs are tracked as separate slots.
    Independent,
}

impl fmt::Display for RemoteCompactionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCompactionPolicy::Shared => f.write_str("shared"),
            RemoteCompactionPolicy::Independent => f.write_str("independent"),
        }
    }
}

impl FromStr for RemoteCompactionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(RemoteCompactionPolicy::Shared),
            "independent" => Ok(RemoteCompactionPolicy::Independent),
            other => Err(Error::InvalidArgument(format!(
                "unknown remote compaction policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub remote_policy: RemoteCompactionPolicy,
    pub compactor: Arc<dyn Compactor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_policy: RemoteCompactionPolicy::default(),
            compactor: Arc::new(RowsetMergeCompactor::default()),
        }
    }
}

///
/// Engine facade used by the admin actions: owns the tablet registry and the compaction
/// status table, and is the single entry point for running a compaction.
///
pub struct StorageEngine {
    config: EngineConfig,
    tablets: RwLock<BTreeMap<TabletId, Arc<Tablet>>>,
    status: StatusTable,
}

impl StorageEngine {
    pub fn new(config: EngineConfig) -> Self {
        let status = StatusTable::new(config.remote_policy);
        Self {
            config,
            tablets: RwLock::new(BTreeMap::new()),
            status,
        }
    }

    pub fn remote_policy(&self) -> RemoteCompactionPolicy {
        self.config.remote_policy
    }

    pub fn add_tablet(&self, tablet: Tablet) -> Result<Arc<Tablet>> {
        let mut tablets = self.tablets.write();
        if tablets.contains_key(&tablet.id()) {
            return Err(Error::InvalidArgument(format!(
                "tablet {} already exists",
                tablet.id()
            )));
        }
        let tablet = Arc::new(tablet);
        tablets.insert(tablet.id(), Arc::clone(&tablet));
        log::info!("Added tablet {} of table {}", tablet.id(), tablet.table_id());
        Ok(tablet)
    }

    pub fn get_tablet(&self, id: TabletId) -> Option<Arc<Tablet>> {
        self.tablets.read().get(&id).cloned()
    }

    pub fn tablet(&self, id: TabletId) -> Result<Arc<Tablet>> {
        self.get_tablet(id)
            .ok_or_else(|| Error::NotFound(format!("tablet {} not found", id)))
    }

    pub fn tablets(&self) -> Vec<Arc<Tablet>> {
        self.tablets.read().values().cloned().collect()
    }

    pub fn tablets_of_table(&self, table_id: i64) -> Vec<Arc<Tablet>> {
        self.tablets
            .read()
            .values()
            .filter(|t| t.table_id() == table_id)
            .cloned()
            .collect()
    }

    ///
    /// Unregister a tablet and forget its compaction status. Runs already holding the
    /// tablet keep it alive until they finish; their final status write is dropped.
    ///
    pub fn drop_tablet(&self, id: TabletId) -> Result<Arc<Tablet>> {
        // registry before status table, same order as admission
        let mut tablets = self.tablets.write();
        let tablet = tablets
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("tablet {} not found", id)))?;
        self.status.remove_tablet(id);
        drop(tablets);
        log::info!("Dropped tablet {}", id);
        Ok(tablet)
    }

    ///
    /// Admit a run for `(tablet, kind)` or fail with [`Error::AlreadyRunning`]. The tablet
    /// must still be the registered one; a handle resolved before a drop is `NotFound`.
    ///
    pub fn try_begin_compaction(
        &self,
        tablet: &Tablet,
        kind: CompactionType,
        remote: bool,
    ) -> Result<RunTicket> {
        let tablets = self.tablets.read();
        let registered = tablets
            .get(&tablet.id())
            .map(|t| std::ptr::eq(Arc::as_ptr(t), tablet))
            .unwrap_or(false);
        if !registered {
            return Err(Error::NotFound(format!("tablet {} not found", tablet.id())));
        }
        self.status.try_begin(tablet.id(), kind, remote, now_ms()?)
    }

    /// The admitted run reached the pool; stamp it into the tablet's history.
    pub fn confirm_compaction(&self, tablet: &Tablet, ticket: &RunTicket) {
        tablet.record_schedule(ticket.compact_type(), ticket.submitted_ms());
    }

    pub fn revert_compaction(&self, ticket: &RunTicket) {
        self.status.revert(ticket);
    }

    pub fn mark_compaction_running(&self, ticket: &RunTicket) -> Result<()> {
        self.status.mark_running(ticket, now_ms()?)
    }

    pub fn finish_compaction(&self, ticket: &RunTicket, outcome: CompactionOutcome) -> Result<()> {
        self.status.finish(ticket, outcome, now_ms()?)
    }

    pub fn compaction_status(
        &self,
        tablet: TabletId,
        kind: CompactionType,
        remote: bool,
    ) -> CompactionStatusRecord {
        self.status.get(tablet, kind, remote)
    }

    pub fn running_compactions(&self) -> Vec<InFlightCompaction> {
        self.status.in_flight()
    }

    ///
    /// Run the configured compactor and keep the tablet's compaction history current.
    ///
    pub fn compact(
        &self,
        tablet: &Tablet,
        kind: CompactionType,
        remote: bool,
    ) -> Result<CompactionStats> {
        let result = self.config.compactor.compact(tablet, kind, remote);
        match now_ms() {
            Ok(now) => match &result {
                Ok(_) => tablet.record_success(kind, now),
                Err(e) => tablet.record_failure(kind, now, e),
            },
            Err(e) => log::warn!("Unable to timestamp compaction history: {:?}", e),
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::tablet::test::*;
    use crate::engine::compaction::RunState;

    #[test]
    fn lookup_and_drop_tablets() {
        let engine = StorageEngine::new(EngineConfig::default());
        engine.add_tablet(generate_tablet(1, 2)).unwrap();
        engine.add_tablet(generate_tablet(2, 2)).unwrap();
        assert!(matches!(
            engine.add_tablet(generate_tablet(1, 2)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(engine.tablets_of_table(1000).len(), 2);
        assert!(matches!(engine.tablet(TabletId(3)), Err(Error::NotFound(_))));

        engine.drop_tablet(TabletId(1)).unwrap();
        assert!(engine.get_tablet(TabletId(1)).is_none());
        assert!(matches!(
            engine.drop_tablet(TabletId(1)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn compact_records_history() {
        let engine = StorageEngine::new(EngineConfig::default());
        let tablet = engine.add_tablet(generate_tablet(1, 3)).unwrap();

        let ticket = engine
            .try_begin_compaction(&tablet, CompactionType::Base, false)
            .unwrap();
        assert!(tablet.history(CompactionType::Base).last_schedule_ms.is_none());
        engine.confirm_compaction(&tablet, &ticket);
        assert_eq!(
            tablet.history(CompactionType::Base).last_schedule_ms,
            Some(ticket.submitted_ms())
        );
        let result = engine.compact(&tablet, CompactionType::Base, false);
        assert!(result.is_err());
        engine
            .finish_compaction(&ticket, CompactionOutcome::from(result))
            .unwrap();

        let history = tablet.history(CompactionType::Base);
        assert!(history.last_failure_ms.is_some());
        assert!(history.last_success_ms.is_none());

        engine
            .compact(&tablet, CompactionType::Cumulative, false)
            .unwrap();
        assert_eq!(
            tablet.history(CompactionType::Cumulative).last_status.as_deref(),
            Some("OK")
        );
    }

    #[test]
    fn dropping_tablet_detaches_in_flight_run() {
        let engine = StorageEngine::new(EngineConfig::default());
        let tablet = engine.add_tablet(generate_tablet(1, 3)).unwrap();
        let ticket = engine
            .try_begin_compaction(&tablet, CompactionType::Full, false)
            .unwrap();
        engine.drop_tablet(TabletId(1)).unwrap();

        // the run still owns the tablet
        let outcome = CompactionOutcome::from(engine.compact(&tablet, CompactionType::Full, false));
        assert!(outcome.is_success());
        assert!(engine.finish_compaction(&ticket, outcome).is_err());
        assert_eq!(
            engine
                .compaction_status(TabletId(1), CompactionType::Full, false)
                .state,
            RunState::Idle
        );
    }

    #[test]
    fn stale_handle_is_not_admitted_after_drop() {
        let engine = StorageEngine::new(EngineConfig::default());
        let resolved = engine.add_tablet(generate_tablet(1, 3)).unwrap();
        engine.drop_tablet(TabletId(1)).unwrap();

        let err = engine
            .try_begin_compaction(&resolved, CompactionType::Base, false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(engine.running_compactions().is_empty());

        // a new tablet under the same id starts clean and the old handle stays rejected
        let fresh = engine.add_tablet(generate_tablet(1, 3)).unwrap();
        assert!(matches!(
            engine.try_begin_compaction(&resolved, CompactionType::Base, false),
            Err(Error::NotFound(_))
        ));
        let record = engine.compaction_status(TabletId(1), CompactionType::Base, false);
        assert_eq!(record.state, RunState::Idle);
        assert!(record.last_run.is_none());
        engine
            .try_begin_compaction(&fresh, CompactionType::Base, false)
            .unwrap();
        assert_eq!(engine.running_compactions().len(), 1);
    }

    #[test]
    fn parses_remote_policy() {
        assert_eq!(
            "Independent".parse::<RemoteCompactionPolicy>().unwrap(),
            RemoteCompactionPolicy::Independent
        );
        assert!("sometimes".parse::<RemoteCompactionPolicy>().is_err());
    }
}
