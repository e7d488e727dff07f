use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;

use super::compaction::CompactionType;
use crate::error::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TabletId(pub i64);

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive range of load versions covered by a rowset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Version {
    pub start: i64,
    pub end: i64,
}

impl Version {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rowset {
    pub version: Version,
    pub num_rows: u64,
    pub data_size: u64,
    pub num_segments: u32,
    pub overlapping: bool,
}

impl Rowset {
    /// A freshly loaded rowset, one segment, not yet merged.
    pub fn new(version: Version, num_rows: u64, data_size: u64) -> Self {
        Self {
            version,
            num_rows,
            data_size,
            num_segments: 1,
            overlapping: false,
        }
    }
}

/// Timestamps are milliseconds since the unix epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompactionHistory {
    pub last_schedule_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_status: Option<String>,
}

struct TabletMeta {
    // sorted by version, contiguous
    rowsets: Vec<Rowset>,
    cumulative_point: i64,
    history: [CompactionHistory; 3],
}

///
/// A single shard of a table. Shared between the engine registry and any compaction
/// that is currently working on it.
///
pub struct Tablet {
    id: TabletId,
    table_id: i64,
    remote_storage: Option<String>,
    meta: RwLock<TabletMeta>,
}

impl Tablet {
    pub fn new(id: TabletId, table_id: i64) -> Self {
        Self {
            id,
            table_id,
            remote_storage: None,
            meta: RwLock::new(TabletMeta {
                rowsets: Vec::new(),
                cumulative_point: 0,
                history: Default::default(),
            }),
        }
    }

    /// Attach the remote storage resource that remote compactions read from.
    pub fn with_remote_storage(mut self, resource: impl Into<String>) -> Self {
        self.remote_storage = Some(resource.into());
        self
    }

    pub fn id(&self) -> TabletId {
        self.id
    }

    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    pub fn remote_storage(&self) -> Option<&str> {
        self.remote_storage.as_deref()
    }

    pub fn rowsets(&self) -> Vec<Rowset> {
        self.meta.read().rowsets.clone()
    }

    pub fn num_rowsets(&self) -> usize {
        self.meta.read().rowsets.len()
    }

    /// -1 when nothing has been loaded yet.
    pub fn max_version(&self) -> i64 {
        self.meta
            .read()
            .rowsets
            .last()
            .map(|r| r.version.end)
            .unwrap_or(-1)
    }

    pub fn cumulative_point(&self) -> i64 {
        self.meta.read().cumulative_point
    }

    pub fn history(&self, kind: CompactionType) -> CompactionHistory {
        self.meta.read().history[kind.index()].clone()
    }

    ///
    /// Append a newly loaded rowset. Versions must stay contiguous.
    ///
    pub fn add_rowset(&self, rowset: Rowset) -> Result<()> {
        let mut meta = self.meta.write();
        let expected = meta.rowsets.last().map(|r| r.version.end + 1).unwrap_or(0);
        if rowset.version.start != expected || rowset.version.end < rowset.version.start {
            return Err(Error::InvalidArgument(format!(
                "tablet {} expects a rowset starting at version {}, got {}",
                self.id, expected, rowset.version
            )));
        }
        meta.rowsets.push(rowset);
        Ok(())
    }

    ///
    /// Swap a contiguous run of input rowsets for a single merged output rowset.
    /// Fails when the inputs no longer exist, which happens when another compaction
    /// replaced them first.
    ///
    pub fn replace_rowsets(
        &self,
        inputs: &[Version],
        output: Rowset,
        cumulative_point: Option<i64>,
    ) -> Result<()> {
        let (first, last) = match (inputs.first(), inputs.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(Error::InvalidArgument(String::from(
                    "no input rowsets to replace",
                )))
            }
        };
        if output.version != Version::new(first.start, last.end) {
            return Err(Error::Internal(format!(
                "output version {} does not cover inputs {}..{}",
                output.version, first, last
            )));
        }
        let mut meta = self.meta.write();
        let pos = meta
            .rowsets
            .iter()
            .position(|r| r.version == first)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "input rowset {} of tablet {} changed concurrently",
                    first, self.id
                ))
            })?;
        let end = pos + inputs.len();
        let unchanged = meta
            .rowsets
            .get(pos..end)
            .map(|current| current.iter().map(|r| r.version).eq(inputs.iter().copied()))
            .unwrap_or(false);
        if !unchanged {
            return Err(Error::Internal(format!(
                "input rowsets {}..{} of tablet {} changed concurrently",
                first, last, self.id
            )));
        }
        meta.rowsets.splice(pos..end, std::iter::once(output));
        if let Some(point) = cumulative_point {
            meta.cumulative_point = meta.cumulative_point.max(point);
        }
        Ok(())
    }

    pub(crate) fn record_schedule(&self, kind: CompactionType, now_ms: u64) {
        self.meta.write().history[kind.index()].last_schedule_ms = Some(now_ms);
    }

    pub(crate) fn record_success(&self, kind: CompactionType, now_ms: u64) {
        let mut meta = self.meta.write();
        let history = &mut meta.history[kind.index()];
        history.last_success_ms = Some(now_ms);
        history.last_status = Some(String::from("OK"));
    }

    pub(crate) fn record_failure(&self, kind: CompactionType, now_ms: u64, err: &Error) {
        let mut meta = self.meta.write();
        let history = &mut meta.history[kind.index()];
        history.last_failure_ms = Some(now_ms);
        history.last_status = Some(err.to_string());
    }
}
