pub mod admin;
pub mod engine;
pub mod error;
mod exec_env;
mod thread_pool;

pub use exec_env::ExecEnv;
pub use thread_pool::{PoolConfig, ThreadPool};
