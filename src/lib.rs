#![forbid(unsafe_code)]

pub mod chunkset;
pub mod config;
pub mod error;
pub mod refcount;
pub mod telemetry;
pub mod wal;
pub mod worker;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the main surface at the crate root for convenience
pub use crate::chunkset::{
    ChunkSetEnv, ChunkSetError, ChunkWorkerSet, GougingError, Listener, Trigger, UnresolvedWorker,
    WorkerResponse, WorkerState, check_gouging, signal,
};
pub use crate::config::{Allowance, Config, ConfigError, LoggingConfig, RefreshLimits};
pub use crate::refcount::{RefCountError, RefCounter, apply_updates};
pub use crate::wal::{MemoryWal, Update, Wal, WalError, WalTransaction};
pub use crate::worker::{
    CipherKey, Currency, ErasureCoder, HasSectorJob, HasSectorResponse, PriceTable, SectorRoot,
    Worker, WorkerError, WorkerPool,
};
