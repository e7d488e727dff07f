use parking_lot::Mutex;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{sync_channel, Receiver, SyncSender, TrySendError},
        Arc,
    },
    thread::JoinHandle,
};

use crate::error::*;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub name: String,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::from("CompactionWorker"),
            workers: 4,
            queue_capacity: 128,
        }
    }
}

///
/// Fixed set of named worker threads draining a bounded queue. Submission never blocks:
/// a full or closed queue is reported as [`Error::Unavailable`].
///
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

impl ThreadPool {
    pub fn start(config: PoolConfig) -> Result<Self> {
        let (tx, rx) = sync_channel::<Job>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for idx in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let active = Arc::clone(&active);
            let thread_bldr = std::thread::Builder::new().name(format!("{}-{}", config.name, idx));
            workers.push(thread_bldr.spawn(move || Self::work(rx, active))?);
        }
        log::info!(
            "Started pool {} with {} workers",
            config.name,
            workers.len()
        );
        Ok(Self {
            name: config.name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            active,
        })
    }

    fn work(rx: Arc<Mutex<Receiver<Job>>>, active: Arc<AtomicUsize>) {
        loop {
            let job = rx.lock().recv();
            let Ok(job) = job else {
                break;
            };
            active.fetch_add(1, Ordering::SeqCst);
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::error!("Job panicked on {:?}", std::thread::current().name());
            }
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| Error::Unavailable(format!("pool {} is shut down", self.name)))?;
        sender.try_send(Box::new(job)).map_err(|e| match e {
            TrySendError::Full(_) => Error::Unavailable(format!("pool {} queue is full", self.name)),
            TrySendError::Disconnected(_) => {
                Error::Unavailable(format!("pool {} is shut down", self.name))
            }
        })
    }

    /// Jobs currently executing (not counting queued ones).
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    ///
    /// Stop accepting work, let queued jobs drain and join the workers.
    ///
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                log::warn!("Worker of pool {} exited abnormally", self.name);
            }
        }
        log::info!("Stopped pool {}", self.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::start(PoolConfig::default()).unwrap();
        let (tx, rx) = channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect::<Vec<_>>();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_after_shutdown() {
        let pool = ThreadPool::start(PoolConfig::default()).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(matches!(pool.submit(|| {}), Err(Error::Unavailable(_))));
    }

    #[test]
    fn rejects_when_queue_is_full() {
        let pool = ThreadPool::start(PoolConfig {
            workers: 1,
            queue_capacity: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel::<()>();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // fills the single queue slot
        pool.submit(|| {}).unwrap();
        assert!(matches!(pool.submit(|| {}), Err(Error::Unavailable(_))));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn survives_panicking_job() {
        let pool = ThreadPool::start(PoolConfig {
            workers: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let (tx, rx) = channel();
        pool.submit(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
