//! Worker pool facade and has-sector job types.
//!
//! The worker pool, its RPC transport, and the erasure coder are external
//! collaborators; this module defines the read-only traits the discovery
//! engine consumes and the job/response types that flow across them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest unit of spendable value. Prices are per byte or per job.
pub type Currency = u64;

/// Merkle root identifying one stored sector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorRoot(pub [u8; 32]);

impl SectorRoot {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorRoot({self})")
    }
}

/// Master key for the chunk's cipher. Held for later decryption, never
/// inspected here.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CipherKey(pub [u8; 32]);

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.write_str("CipherKey(..)")
    }
}

/// Prices a host quotes for serving has-sector queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTable {
    /// Flat cost of initializing one job on the host.
    pub init_base_cost: Currency,
    /// Cost per sector root probed within a job.
    pub has_sector_base_cost: Currency,
    /// Cost per byte downloaded from the host.
    pub download_bandwidth_cost: Currency,
    /// Cost per byte uploaded to the host.
    pub upload_bandwidth_cost: Currency,
}

/// Erasure-coding parameters of a chunk, as far as discovery cares.
pub trait ErasureCoder: Send + Sync {
    fn num_pieces(&self) -> usize;
    fn min_pieces(&self) -> usize;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker job queue is full")]
    QueueFull,
    #[error("worker is on cooldown")]
    OnCooldown,
    #[error("remote host failure: {reason}")]
    Remote { reason: String },
}

/// A queued availability probe for a set of sector roots.
///
/// The executing worker must deliver exactly one [`HasSectorResponse`] per
/// accepted job, echoing the job's worker handle; failures are reported
/// through the response's `err` field rather than by staying silent.
pub struct HasSectorJob {
    pub worker: Arc<dyn Worker>,
    pub roots: Vec<SectorRoot>,
    pub response_tx: Sender<HasSectorResponse>,
}

/// A worker's answer to a has-sector probe. `availables[i]` states whether
/// the worker holds the sector at root index `i`.
#[derive(Clone)]
pub struct HasSectorResponse {
    pub worker: Arc<dyn Worker>,
    pub availables: Vec<bool>,
    pub err: Option<WorkerError>,
}

/// One remote host as seen by discovery.
pub trait Worker: Send + Sync {
    /// Stable identity of the host behind this worker.
    fn key(&self) -> &str;

    /// The host's current price table.
    fn price_table(&self) -> PriceTable;

    /// Queue a has-sector job, returning the queue's estimate of when the
    /// job will complete.
    fn enqueue_has_sector(&self, job: HasSectorJob) -> Result<Instant, WorkerError>;
}

/// Read-only facade over the shared worker pool. Must be safe for
/// concurrent snapshot reads.
pub trait WorkerPool: Send + Sync {
    /// Snapshot of the current worker set.
    fn workers(&self) -> Vec<Arc<dyn Worker>>;

    fn num_workers(&self) -> usize {
        self.workers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_root_displays_as_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let root = SectorRoot(bytes);
        let hex = root.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
    }

    #[test]
    fn cipher_key_debug_redacts_material() {
        let key = CipherKey([0x42; 32]);
        assert_eq!(format!("{key:?}"), "CipherKey(..)");
    }
}
