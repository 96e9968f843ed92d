//! Shared fixtures for the integration suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use piecework::{
    Allowance, ChunkSetEnv, ErasureCoder, HasSectorJob, HasSectorResponse, PriceTable,
    RefreshLimits, SectorRoot, Trigger, Worker, WorkerError, WorkerPool, signal,
};

/// How a scripted worker answers its has-sector jobs.
pub enum Reply {
    Available(Vec<bool>),
    Error(WorkerError),
    Never,
}

pub struct ScriptedWorker {
    key: String,
    price_table: PriceTable,
    reply: Reply,
    response_delay: Duration,
    parked: Mutex<Vec<HasSectorJob>>,
}

impl ScriptedWorker {
    pub fn new(key: &str, reply: Reply) -> Arc<Self> {
        Self::with_delay(key, reply, Duration::ZERO)
    }

    pub fn with_delay(key: &str, reply: Reply, response_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            price_table: PriceTable::default(),
            reply,
            response_delay,
            parked: Mutex::new(Vec::new()),
        })
    }

    /// Pull a job parked by `Reply::Never`, if any.
    pub fn take_parked_job(&self) -> Option<HasSectorJob> {
        self.parked.lock().unwrap().pop()
    }
}

impl Worker for ScriptedWorker {
    fn key(&self) -> &str {
        &self.key
    }

    fn price_table(&self) -> PriceTable {
        self.price_table
    }

    fn enqueue_has_sector(&self, job: HasSectorJob) -> Result<Instant, WorkerError> {
        let delay = self.response_delay;
        match &self.reply {
            Reply::Never => {
                self.parked.lock().unwrap().push(job);
            }
            Reply::Available(availables) => {
                let availables = availables.clone();
                thread::spawn(move || {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    let worker = Arc::clone(&job.worker);
                    let _ = job.response_tx.send(HasSectorResponse {
                        worker,
                        availables,
                        err: None,
                    });
                });
            }
            Reply::Error(err) => {
                let err = err.clone();
                thread::spawn(move || {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    let worker = Arc::clone(&job.worker);
                    let _ = job.response_tx.send(HasSectorResponse {
                        worker,
                        availables: Vec::new(),
                        err: Some(err),
                    });
                });
            }
        }
        Ok(Instant::now())
    }
}

pub struct ScriptedPool {
    workers: Vec<Arc<dyn Worker>>,
    snapshots: AtomicUsize,
}

impl ScriptedPool {
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Arc<Self> {
        Arc::new(Self {
            workers,
            snapshots: AtomicUsize::new(0),
        })
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }
}

impl WorkerPool for ScriptedPool {
    fn workers(&self) -> Vec<Arc<dyn Worker>> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.workers.clone()
    }

    fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

pub struct FixedCoder {
    pub pieces: usize,
    pub min: usize,
}

impl ErasureCoder for FixedCoder {
    fn num_pieces(&self) -> usize {
        self.pieces
    }

    fn min_pieces(&self) -> usize {
        self.min
    }
}

pub fn coder(pieces: usize, min: usize) -> Arc<dyn ErasureCoder> {
    Arc::new(FixedCoder { pieces, min })
}

pub fn roots(count: usize) -> Vec<SectorRoot> {
    (0..count).map(|i| SectorRoot([i as u8; 32])).collect()
}

pub fn limits(reset_ms: u64, timeout_ms: u64) -> RefreshLimits {
    RefreshLimits {
        worker_state_reset_ms: reset_ms,
        has_sector_timeout_ms: timeout_ms,
    }
}

/// An environment over `pool` plus the shutdown trigger keeping it alive.
pub fn env(pool: &Arc<ScriptedPool>, limits: RefreshLimits) -> (ChunkSetEnv, Trigger) {
    let (shutdown_trigger, shutdown) = signal();
    let env = ChunkSetEnv {
        pool: Arc::clone(pool) as Arc<dyn WorkerPool>,
        allowance: Allowance::default(),
        limits,
        shutdown,
    };
    (env, shutdown_trigger)
}

/// Block until the generation has no unresolved workers left.
pub fn wait_for_resolution(state: &piecework::WorkerState) {
    while let Some(listener) = state.register_for_worker_update() {
        listener.wait();
    }
}
