//! Crash-safe per-contract sector reference counting.
//!
//! A [`RefCounter`] owns one counter file and tracks how many references
//! exist to each sector a file contract stores. Mutations never touch the
//! disk directly: inside an update session each operation stages its effect
//! in memory and returns a WAL update record, the caller commits those
//! records in a transaction, and the appliers in [`update`] reflect them on
//! disk. A crash at any point leaves the file recoverable by replaying the
//! WAL's pending updates.

mod codec;
mod update;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::wal::{Update, Wal, WalError};

pub use codec::{COUNTER_EXTENSION, COUNTER_VERSION};
pub use update::{
    DELETE_UPDATE, TRUNCATE_UPDATE, WRITE_AT_UPDATE, apply_update, apply_updates, delete_update,
    read_delete_update, read_truncate_update, read_write_at_update, truncate_update,
    write_at_update,
};

pub type RefCountResult<T> = Result<T, RefCountError>;

#[derive(Debug, Error)]
pub enum RefCountError {
    #[error("sector number {sector} is out of bounds for {num_sectors} sectors")]
    InvalidSectorNumber { sector: u64, num_sectors: u64 },
    #[error("unrecognized counter file version")]
    InvalidVersion,
    #[error("malformed update: {reason}")]
    InvalidUpdate { reason: String },
    #[error("update called without an open update session")]
    UpdateWithoutUpdateSession,
    #[error("update called after a delete was staged")]
    UpdateAfterDelete,
    #[error("sector {sector} is at the maximum reference count")]
    CounterOverflow { sector: u64 },
    #[error("sector {sector} has no references to drop")]
    CounterUnderflow { sector: u64 },
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Wal(#[from] WalError),
}

/// Persistent reference counter for the sectors of one file contract.
///
/// The counter is single-owner: one thread drives the session lifecycle
/// `start_update` → mutations → `create_and_apply_transaction` →
/// `update_applied`. Concurrent readers must serialize externally.
pub struct RefCounter {
    path: PathBuf,
    num_sectors: u64,
    wal: Arc<dyn Wal>,

    update_in_progress: bool,
    deleted: bool,
    /// Values staged in the current session, overriding the file.
    staged_counts: HashMap<u64, u16>,
}

impl std::fmt::Debug for RefCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefCounter")
            .field("path", &self.path)
            .field("num_sectors", &self.num_sectors)
            .field("update_in_progress", &self.update_in_progress)
            .field("deleted", &self.deleted)
            .field("staged_counts", &self.staged_counts)
            .finish()
    }
}

impl RefCounter {
    /// Create a fresh counter file with every sector at one reference.
    /// Truncates any existing file at `path`.
    pub fn create(
        path: impl Into<PathBuf>,
        num_sectors: u64,
        wal: Arc<dyn Wal>,
    ) -> RefCountResult<Self> {
        let path = path.into();
        let mut buf =
            Vec::with_capacity((codec::HEADER_LEN + codec::COUNTER_WIDTH * num_sectors) as usize);
        buf.extend_from_slice(&COUNTER_VERSION);
        for _ in 0..num_sectors {
            buf.extend_from_slice(&1u16.to_le_bytes());
        }

        let mut file = File::create(&path).map_err(io_at(&path))?;
        file.write_all(&buf).map_err(io_at(&path))?;
        file.sync_all().map_err(io_at(&path))?;

        Ok(Self {
            path,
            num_sectors,
            wal,
            update_in_progress: false,
            deleted: false,
            staged_counts: HashMap::new(),
        })
    }

    /// Open an existing counter file, validating its version header.
    pub fn load(path: impl Into<PathBuf>, wal: Arc<dyn Wal>) -> RefCountResult<Self> {
        let path = path.into();
        let mut file = File::open(&path).map_err(io_at(&path))?;

        let mut version = [0u8; 8];
        file.read_exact(&mut version).map_err(io_at(&path))?;
        if version != COUNTER_VERSION {
            return Err(RefCountError::InvalidVersion);
        }

        let file_len = file.metadata().map_err(io_at(&path))?.len();
        Ok(Self {
            num_sectors: codec::num_sectors_for_len(file_len),
            path,
            wal,
            update_in_progress: false,
            deleted: false,
            staged_counts: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_sectors(&self) -> u64 {
        self.num_sectors
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Current reference count of `sector`: the value staged in this
    /// session if any, otherwise the value on disk.
    pub fn count(&self, sector: u64) -> RefCountResult<u16> {
        self.read_count(sector)
    }

    /// Open an update session. Mutations are only legal while one is open.
    pub fn start_update(&mut self) -> RefCountResult<()> {
        if self.deleted {
            return Err(RefCountError::UpdateAfterDelete);
        }
        self.update_in_progress = true;
        Ok(())
    }

    /// Close the session after its transaction was applied, discarding the
    /// staged overrides now reflected on disk.
    pub fn update_applied(&mut self) {
        self.staged_counts.clear();
        self.update_in_progress = false;
    }

    /// Stage an increment of `sector`'s count.
    pub fn increment(&mut self, sector: u64) -> RefCountResult<Update> {
        self.ensure_open_session()?;
        let current = self.read_count(sector)?;
        if current == u16::MAX {
            return Err(RefCountError::CounterOverflow { sector });
        }
        let value = current + 1;
        self.staged_counts.insert(sector, value);
        update::write_at_update(&self.path, sector, value)
    }

    /// Stage a decrement of `sector`'s count.
    pub fn decrement(&mut self, sector: u64) -> RefCountResult<Update> {
        self.ensure_open_session()?;
        let current = self.read_count(sector)?;
        if current == 0 {
            return Err(RefCountError::CounterUnderflow { sector });
        }
        let value = current - 1;
        self.staged_counts.insert(sector, value);
        update::write_at_update(&self.path, sector, value)
    }

    /// Stage a new sector at the end of the file with one reference.
    pub fn append(&mut self) -> RefCountResult<Update> {
        self.ensure_open_session()?;
        let sector = self.num_sectors;
        self.staged_counts.insert(sector, 1);
        self.num_sectors += 1;
        update::write_at_update(&self.path, sector, 1)
    }

    /// Stage the removal of the last `count` sectors.
    pub fn drop_sectors(&mut self, count: u64) -> RefCountResult<Update> {
        self.ensure_open_session()?;
        if count > self.num_sectors {
            return Err(RefCountError::InvalidSectorNumber {
                sector: count,
                num_sectors: self.num_sectors,
            });
        }
        let new_num_sectors = self.num_sectors - count;
        self.staged_counts
            .retain(|&sector, _| sector < new_num_sectors);
        self.num_sectors = new_num_sectors;
        update::truncate_update(&self.path, new_num_sectors)
    }

    /// Stage an exchange of the counts of two sectors.
    pub fn swap(&mut self, first: u64, second: u64) -> RefCountResult<Vec<Update>> {
        self.ensure_open_session()?;
        let first_value = self.read_count(first)?;
        let second_value = self.read_count(second)?;
        self.staged_counts.insert(first, second_value);
        self.staged_counts.insert(second, first_value);
        Ok(vec![
            update::write_at_update(&self.path, first, second_value)?,
            update::write_at_update(&self.path, second, first_value)?,
        ])
    }

    /// Stage the removal of the whole counter file. Every further mutation
    /// on this counter fails with [`RefCountError::UpdateAfterDelete`].
    pub fn delete_ref_counter(&mut self) -> RefCountResult<Update> {
        self.ensure_open_session()?;
        self.deleted = true;
        update::delete_update(&self.path)
    }

    /// Commit the session's updates to the WAL, apply them to disk, and
    /// release the WAL reservation. The caller must still close the
    /// session with [`RefCounter::update_applied`].
    pub fn create_and_apply_transaction(&mut self, updates: Vec<Update>) -> RefCountResult<()> {
        if !self.update_in_progress {
            return Err(RefCountError::UpdateWithoutUpdateSession);
        }
        let txn = self.wal.begin_transaction(updates.clone())?;
        update::apply_updates(&updates)?;
        txn.signal_applied()?;
        Ok(())
    }

    fn ensure_open_session(&self) -> RefCountResult<()> {
        if self.deleted {
            return Err(RefCountError::UpdateAfterDelete);
        }
        if !self.update_in_progress {
            return Err(RefCountError::UpdateWithoutUpdateSession);
        }
        Ok(())
    }

    fn read_count(&self, sector: u64) -> RefCountResult<u16> {
        if sector >= self.num_sectors {
            return Err(RefCountError::InvalidSectorNumber {
                sector,
                num_sectors: self.num_sectors,
            });
        }
        if let Some(&value) = self.staged_counts.get(&sector) {
            return Ok(value);
        }

        let mut file = File::open(&self.path).map_err(io_at(&self.path))?;
        file.seek(SeekFrom::Start(codec::counter_offset(sector)))
            .map_err(io_at(&self.path))?;
        let mut buf = [0u8; 2];
        file.read_exact(&mut buf).map_err(io_at(&self.path))?;
        Ok(u16::from_le_bytes(buf))
    }
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> RefCountError {
    let path = path.to_path_buf();
    move |source| RefCountError::Io { path, source }
}
