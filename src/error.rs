use thiserror::Error;

use crate::chunkset::{ChunkSetError, GougingError};
use crate::config::ConfigError;
use crate::refcount::RefCountError;
use crate::wal::WalError;
use crate::worker::WorkerError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the capability errors
/// defined by each module.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    RefCount(#[from] RefCountError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    ChunkSet(#[from] ChunkSetError),

    #[error(transparent)]
    Gouging(#[from] GougingError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
