use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::*;

pub mod compaction;
mod storage;
pub(crate) mod tablet;

pub use storage::{EngineConfig, RemoteCompactionPolicy, StorageEngine};
pub use tablet::{CompactionHistory, Rowset, Tablet, TabletId, Version};

/// Milliseconds since the unix epoch.
pub(crate) fn now_ms() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64)
}
