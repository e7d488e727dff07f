use crate::{
    error::*,
    thread_pool::{PoolConfig, ThreadPool},
};

///
/// Process wide execution resources handed to admin actions.
///
pub struct ExecEnv {
    compaction_pool: ThreadPool,
}

impl ExecEnv {
    pub fn start(compaction_pool: PoolConfig) -> Result<Self> {
        Ok(Self {
            compaction_pool: ThreadPool::start(compaction_pool)?,
        })
    }

    /// Background context that manual compactions are submitted to.
    pub fn compaction_pool(&self) -> &ThreadPool {
        &self.compaction_pool
    }

    pub fn shutdown(&self) {
        self.compaction_pool.shutdown();
    }
}
