use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tablet_compaction::{
    admin::{compaction_router, AdminServer, AllowAll, ServerConfig},
    engine::{
        compaction::RowsetMergeCompactor, EngineConfig, RemoteCompactionPolicy, Rowset,
        StorageEngine, Tablet, TabletId, Version,
    },
    error::Result,
    ExecEnv, PoolConfig,
};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Admin endpoint for inspecting and triggering tablet compaction.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Address the admin HTTP server binds to.
    #[arg(long, env = "COMPACTION_ADMIN_ADDR", default_value = "0.0.0.0:8040")]
    addr: SocketAddr,

    /// Background threads running triggered compactions.
    #[arg(long, env = "COMPACTION_WORKERS", default_value_t = 4)]
    compaction_workers: usize,

    /// Compactions that may wait for a worker before triggers are refused.
    #[arg(long, env = "COMPACTION_QUEUE", default_value_t = 128)]
    compaction_queue: usize,

    /// Whether remote and local compactions of one type exclude each other (shared)
    /// or are tracked separately (independent).
    #[arg(long, env = "COMPACTION_REMOTE_POLICY", default_value = "shared")]
    remote_policy: RemoteCompactionPolicy,

    /// Fewest rowsets a compaction will merge.
    #[arg(long, env = "COMPACTION_MIN_INPUT_ROWSETS", default_value_t = 2)]
    min_input_rowsets: usize,

    /// Register this many demo tablets with a few rowsets each.
    #[arg(long, default_value_t = 0)]
    demo_tablets: i64,
}

fn seed_demo_tablets(engine: &StorageEngine, count: i64) -> Result<()> {
    for id in 1..=count {
        let tablet = Tablet::new(TabletId(id), 1 + id % 2);
        for v in 0..5 {
            tablet.add_rowset(Rowset::new(Version::new(v, v), 1000, 64 * 1024))?;
        }
        engine.add_tablet(tablet)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("Starting...");

    let engine = Arc::new(StorageEngine::new(EngineConfig {
        remote_policy: args.remote_policy,
        compactor: Arc::new(RowsetMergeCompactor::new(args.min_input_rowsets)),
    }));
    seed_demo_tablets(&engine, args.demo_tablets)?;
    let exec_env = Arc::new(ExecEnv::start(PoolConfig {
        workers: args.compaction_workers,
        queue_capacity: args.compaction_queue,
        ..PoolConfig::default()
    })?);

    let router = compaction_router(Arc::clone(&exec_env), engine, Arc::new(AllowAll));
    let server = AdminServer::start(
        ServerConfig {
            addr: args.addr,
            ..ServerConfig::default()
        },
        router,
    )?;
    server.join();
    exec_env.shutdown();
    Ok(())
}
