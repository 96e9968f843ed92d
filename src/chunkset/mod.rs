//! Projected chunk worker sets.
//!
//! A [`ChunkWorkerSet`] answers one question for one erasure-coded chunk:
//! which workers can serve which pieces right now. It keeps the answer in a
//! [`WorkerState`] generation and refreshes that generation by scattering
//! has-sector queries across the worker pool, gathering responses under a
//! hard deadline. Refreshes are single-flight: concurrent callers coalesce
//! onto the in-flight pass instead of querying the network again.

pub mod gouging;
pub mod signal;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::config::{Allowance, RefreshLimits};
use crate::worker::{
    CipherKey, ErasureCoder, HasSectorJob, HasSectorResponse, SectorRoot, Worker, WorkerError,
    WorkerPool,
};

pub use gouging::{GOUGING_FRACTION_DENOM, GougingError, STREAM_DOWNLOAD_SIZE, check_gouging};
pub use signal::{Listener, Trigger, signal};
pub use state::{UnresolvedWorker, WorkerResponse, WorkerState};

pub type ChunkSetResult<T> = Result<T, ChunkSetError>;

#[derive(Debug, Error)]
pub enum ChunkSetError {
    #[error("{roots} roots provided, but the erasure coder specifies {pieces} pieces")]
    RootCountMismatch { roots: usize, pieces: usize },
    #[error("unable to launch worker discovery: {source}")]
    WorkerLaunchFailed {
        #[source]
        source: std::io::Error,
    },
}

/// Per-worker launch failures. Logged and skipped, never fatal to a pass.
#[derive(Debug, Error)]
enum LaunchError {
    #[error(transparent)]
    Gouging(#[from] GougingError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Shared environment a chunk worker set operates in.
#[derive(Clone)]
pub struct ChunkSetEnv {
    pub pool: Arc<dyn WorkerPool>,
    pub allowance: Allowance,
    pub limits: RefreshLimits,
    /// Process-wide shutdown signal; firing it aborts discovery passes.
    pub shutdown: Listener,
}

struct RefreshSlot {
    update_in_progress: bool,
    update_finished: Listener,
    state: Arc<WorkerState>,
    launch_time: Option<Instant>,
}

/// Discovery handle for a single chunk.
///
/// Construction runs one discovery pass up front, so a freshly built set
/// already knows which workers were asked. The set can then serve any
/// number of downloads; a pass older than the reset interval is replaced on
/// the next [`ChunkWorkerSet::try_update_worker_state`] call.
pub struct ChunkWorkerSet {
    chunk_index: u64,
    piece_roots: Vec<SectorRoot>,
    erasure_coder: Arc<dyn ErasureCoder>,
    master_key: CipherKey,

    pool: Arc<dyn WorkerPool>,
    allowance: Allowance,
    limits: RefreshLimits,
    shutdown: Listener,

    refresh: Mutex<RefreshSlot>,
}

impl std::fmt::Debug for ChunkWorkerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWorkerSet")
            .field("chunk_index", &self.chunk_index)
            .field("piece_roots", &self.piece_roots)
            .finish_non_exhaustive()
    }
}

impl ChunkWorkerSet {
    /// Build a worker set for a chunk given the sector roots of its pieces.
    ///
    /// The root count must match the erasure coder's piece count, with one
    /// legacy exception: 1-of-N chunks may be given a single root.
    pub fn new_from_roots(
        env: ChunkSetEnv,
        roots: Vec<SectorRoot>,
        erasure_coder: Arc<dyn ErasureCoder>,
        master_key: CipherKey,
        chunk_index: u64,
    ) -> ChunkSetResult<Self> {
        let num_pieces = erasure_coder.num_pieces();
        let legacy_single_root = roots.len() == 1 && erasure_coder.min_pieces() == 1;
        if roots.len() != num_pieces && !legacy_single_root {
            return Err(ChunkSetError::RootCountMismatch {
                roots: roots.len(),
                pieces: num_pieces,
            });
        }

        let set = Self {
            chunk_index,
            piece_roots: roots,
            erasure_coder,
            master_key,
            pool: env.pool,
            allowance: env.allowance,
            limits: env.limits,
            shutdown: env.shutdown,
            refresh: Mutex::new(RefreshSlot {
                update_in_progress: false,
                update_finished: Listener::already_fired(),
                state: Arc::new(WorkerState::new()),
                launch_time: None,
            }),
        };

        // The initial state is blank; run one discovery pass before handing
        // the set out.
        set.try_update_worker_state()?;
        Ok(set)
    }

    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    pub fn piece_roots(&self) -> &[SectorRoot] {
        &self.piece_roots
    }

    pub fn erasure_coder(&self) -> &Arc<dyn ErasureCoder> {
        &self.erasure_coder
    }

    pub fn master_key(&self) -> CipherKey {
        self.master_key
    }

    /// The current worker-state generation.
    pub fn worker_state(&self) -> Arc<WorkerState> {
        Arc::clone(&self.lock_refresh().state)
    }

    /// When the current generation launched, if one has.
    pub fn launch_time(&self) -> Option<Instant> {
        self.lock_refresh().launch_time
    }

    /// Register on the current generation for a wakeup when another worker
    /// resolves.
    pub fn register_for_worker_update(&self) -> Option<Listener> {
        self.worker_state().register_for_worker_update()
    }

    /// Refresh the worker state if it is due.
    ///
    /// If another refresh is already in flight, or the current state is
    /// younger than the reset interval, this waits for the in-flight
    /// refresh (a signal that is already fired when none is running) and
    /// returns without querying the network. Otherwise it launches a new
    /// discovery pass and installs the new generation as soon as every
    /// has-sector job is launched, not when the responses are all in.
    pub fn try_update_worker_state(&self) -> ChunkSetResult<()> {
        let finished = {
            let mut slot = self.lock_refresh();
            let still_fresh = slot.launch_time.is_some_and(|launched| {
                launched.elapsed() < self.limits.worker_state_reset_time()
            });
            if slot.update_in_progress || still_fresh {
                let waiter = slot.update_finished.clone();
                drop(slot);
                waiter.wait();
                return Ok(());
            }
            slot.update_in_progress = true;
            let (trigger, listener) = signal();
            slot.update_finished = listener;
            trigger
        };

        let state = Arc::new(WorkerState::new());
        let (launched_trigger, launched_listener) = signal();

        let task = DiscoveryTask {
            chunk_index: self.chunk_index,
            piece_roots: self.piece_roots.clone(),
            pool: Arc::clone(&self.pool),
            allowance: self.allowance,
            timeout: self.limits.has_sector_timeout(),
            shutdown: self.shutdown.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("chunkset-discovery-{}", self.chunk_index))
            .spawn({
                let state = Arc::clone(&state);
                move || task.find_workers(launched_trigger, state)
            });
        if let Err(source) = spawned {
            // Keep the previous generation; clear the flag so a later call
            // can retry.
            let mut slot = self.lock_refresh();
            slot.update_in_progress = false;
            drop(slot);
            finished.fire();
            return Err(ChunkSetError::WorkerLaunchFailed { source });
        }

        launched_listener.wait();

        let mut slot = self.lock_refresh();
        slot.update_in_progress = false;
        slot.state = state;
        slot.launch_time = Some(Instant::now());
        drop(slot);
        finished.fire();
        Ok(())
    }

    fn lock_refresh(&self) -> MutexGuard<'_, RefreshSlot> {
        match self.refresh.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Everything one discovery pass needs, detached from the set so the pass
/// can outlive the caller that triggered it.
struct DiscoveryTask {
    chunk_index: u64,
    piece_roots: Vec<SectorRoot>,
    pool: Arc<dyn WorkerPool>,
    allowance: Allowance,
    timeout: Duration,
    shutdown: Listener,
}

impl DiscoveryTask {
    /// Scatter has-sector jobs across the pool, signal once every job is
    /// launched, then gather responses until the deadline, the shutdown
    /// signal, or the last response. Stragglers simply stay unresolved.
    fn find_workers(self, launched: Trigger, state: Arc<WorkerState>) {
        let deadline = crossbeam::channel::after(self.timeout);
        let workers = self.pool.workers();
        // Sized to the fan-out so responding workers never block on send,
        // even after this receiver is gone.
        let (response_tx, response_rx) =
            crossbeam::channel::bounded::<HasSectorResponse>(workers.len().max(1));

        let mut workers_launched = 0usize;
        for worker in workers {
            match self.launch_worker(Arc::clone(&worker), &response_tx, &state) {
                Ok(()) => workers_launched += 1,
                Err(err) => {
                    tracing::debug!(
                        worker = worker.key(),
                        chunk = self.chunk_index,
                        %err,
                        "skipping worker for this discovery pass"
                    );
                }
            }
        }
        launched.fire();
        drop(response_tx);

        let shutdown_rx = self.shutdown.receiver().clone();
        let mut workers_responded = 0usize;
        while workers_responded < workers_launched {
            crossbeam::select! {
                recv(response_rx) -> resp => {
                    let Ok(resp) = resp else { return };
                    state.handle_response(resp);
                    workers_responded += 1;
                }
                recv(deadline) -> _ => return,
                recv(shutdown_rx) -> _ => return,
            }
        }
    }

    /// Queue one worker's has-sector job and record it as unresolved. Any
    /// failure leaves the state untouched.
    fn launch_worker(
        &self,
        worker: Arc<dyn Worker>,
        response_tx: &Sender<HasSectorResponse>,
        state: &WorkerState,
    ) -> Result<(), LaunchError> {
        let pt = worker.price_table();
        check_gouging(
            &pt,
            &self.allowance,
            self.pool.num_workers(),
            self.piece_roots.len(),
        )?;

        let job = HasSectorJob {
            worker: Arc::clone(&worker),
            roots: self.piece_roots.clone(),
            response_tx: response_tx.clone(),
        };
        let expected_complete_time = worker.enqueue_has_sector(job)?;

        state.insert_unresolved(UnresolvedWorker {
            worker,
            expected_complete_time,
        });
        Ok(())
    }
}
