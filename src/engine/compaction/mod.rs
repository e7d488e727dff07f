use serde::Serialize;
use std::{fmt, str::FromStr};

use super::{Tablet, Version};
use crate::error::*;

mod simple;
mod status;
pub use simple::RowsetMergeCompactor;
pub use status::{CompactionStatusRecord, CompletedRun, InFlightCompaction, RunState, RunTicket};
pub(crate) use status::StatusTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionType {
    Base,
    Cumulative,
    Full,
}

impl CompactionType {
    pub const ALL: [CompactionType; 3] = [
        CompactionType::Base,
        CompactionType::Cumulative,
        CompactionType::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionType::Base => "base",
            CompactionType::Cumulative => "cumulative",
            CompactionType::Full => "full",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            CompactionType::Base => 0,
            CompactionType::Cumulative => 1,
            CompactionType::Full => 2,
        }
    }
}

impl fmt::Display for CompactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CompactionType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown compaction type '{}', expected one of base, cumulative, full",
                    s
                ))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub input_rowsets: usize,
    pub input_rows: u64,
    pub input_bytes: u64,
    pub output_version: Version,
    pub fetched_from_remote: bool,
}

/// Result of a finished compaction run, kept as data for later status queries.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CompactionOutcome {
    Success { stats: CompactionStats },
    Failed { kind: ErrorKind, message: String },
}

impl CompactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompactionOutcome::Success { .. })
    }
}

impl From<Result<CompactionStats>> for CompactionOutcome {
    fn from(result: Result<CompactionStats>) -> Self {
        match result {
            Ok(stats) => CompactionOutcome::Success { stats },
            Err(e) => CompactionOutcome::Failed {
                kind: e.kind(),
                message: e.message(),
            },
        }
    }
}

///
/// The merge algorithm itself. Implementations must tolerate concurrent runs of
/// different compaction types on the same tablet.
///
pub trait Compactor: Send + Sync {
    fn compact(&self, tablet: &Tablet, kind: CompactionType, remote: bool)
        -> Result<CompactionStats>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_compaction_types() {
        assert_eq!("base".parse::<CompactionType>().unwrap(), CompactionType::Base);
        assert_eq!(
            "Cumulative".parse::<CompactionType>().unwrap(),
            CompactionType::Cumulative
        );
        assert_eq!(" full ".parse::<CompactionType>().unwrap(), CompactionType::Full);
        assert!(matches!(
            "major".parse::<CompactionType>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn failed_outcome_keeps_error_detail() {
        let outcome = CompactionOutcome::from(Err(Error::Internal(String::from("disk full"))));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["kind"], "INTERNAL");
        assert_eq!(json["message"], "disk full");
    }
}
