//! Update records and the write-ahead-log seam.
//!
//! The production WAL lives outside this crate; everything here talks to it
//! through the [`Wal`] trait. [`MemoryWal`] is the in-process implementation
//! used by embedders and tests, with the same observable semantics: once a
//! transaction is begun its updates are re-delivered on replay until the
//! caller signals that they have been applied.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use thiserror::Error;

/// A tagged, opaque mutation staged through the write-ahead log.
///
/// The tag names the applier; the instructions are a payload only that
/// applier knows how to decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub name: String,
    pub instructions: Bytes,
}

impl Update {
    pub fn new(name: impl Into<String>, instructions: Bytes) -> Self {
        Self {
            name: name.into(),
            instructions,
        }
    }
}

pub type WalResult<T> = Result<T, WalError>;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal backend failure: {reason}")]
    Backend { reason: String },
    #[error("wal transaction already released")]
    TransactionClosed,
    #[error("wal lock poisoned")]
    LockPoisoned,
}

/// The write-ahead log as this crate consumes it.
///
/// Once `begin_transaction` returns, the update set is durably recorded and
/// will be re-delivered on crash replay until the matching transaction
/// signals that it has been applied. Appliers must therefore be idempotent.
pub trait Wal: Send + Sync {
    fn begin_transaction(&self, updates: Vec<Update>) -> WalResult<Box<dyn WalTransaction>>;
}

/// Handle to one durably recorded update set.
pub trait WalTransaction: Send {
    /// Release the reservation after the updates are reflected on disk.
    fn signal_applied(self: Box<Self>) -> WalResult<()>;
}

/// In-process [`Wal`] with deterministic replay.
///
/// Transactions stay in the pending set from `begin_transaction` until
/// `signal_applied`, so a test can simulate a crash by simply not signaling
/// and then re-applying everything `pending` returns.
#[derive(Clone, Default)]
pub struct MemoryWal {
    inner: Arc<Mutex<MemoryWalState>>,
}

#[derive(Default)]
struct MemoryWalState {
    next_id: u64,
    pending: BTreeMap<u64, Vec<Update>>,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unapplied transactions, oldest first. This is the replay feed.
    pub fn pending(&self) -> WalResult<Vec<Vec<Update>>> {
        let state = self.lock_state()?;
        Ok(state.pending.values().cloned().collect())
    }

    pub fn is_empty(&self) -> WalResult<bool> {
        let state = self.lock_state()?;
        Ok(state.pending.is_empty())
    }

    fn lock_state(&self) -> WalResult<std::sync::MutexGuard<'_, MemoryWalState>> {
        self.inner.lock().map_err(|_| WalError::LockPoisoned)
    }
}

impl Wal for MemoryWal {
    fn begin_transaction(&self, updates: Vec<Update>) -> WalResult<Box<dyn WalTransaction>> {
        let mut state = self.lock_state()?;
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id, updates);
        Ok(Box::new(MemoryWalTransaction {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryWalTransaction {
    id: u64,
    inner: Arc<Mutex<MemoryWalState>>,
}

impl WalTransaction for MemoryWalTransaction {
    fn signal_applied(self: Box<Self>) -> WalResult<()> {
        let mut state = self.inner.lock().map_err(|_| WalError::LockPoisoned)?;
        if state.pending.remove(&self.id).is_none() {
            return Err(WalError::TransactionClosed);
        }
        Ok(())
    }
}
