//! One generation of worker discovery state.
//!
//! A [`WorkerState`] tracks which workers still owe a has-sector response
//! and which pieces the resolved workers turned out to hold. Generations
//! are replaced wholesale by the owning chunk set; within one generation
//! the resolved list is append-only, so a reader that has consumed the
//! first `k` entries only ever needs to look at index `k` onward.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::worker::{HasSectorResponse, Worker};

use super::signal::{Listener, Trigger, signal};

/// A worker whose has-sector query is still outstanding. The expected
/// completion time is the job queue's estimate and is informational only.
#[derive(Clone)]
pub struct UnresolvedWorker {
    pub worker: Arc<dyn Worker>,
    pub expected_complete_time: Instant,
}

impl fmt::Debug for UnresolvedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnresolvedWorker")
            .field("worker", &self.worker.key())
            .field("expected_complete_time", &self.expected_complete_time)
            .finish()
    }
}

/// A worker's settled answer: the piece indices it claims to hold. Workers
/// that answered with an error are recorded with an empty list so that
/// selection logic can still see which workers failed.
#[derive(Clone)]
pub struct WorkerResponse {
    pub worker: Arc<dyn Worker>,
    pub piece_indices: Vec<u64>,
}

impl fmt::Debug for WorkerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerResponse")
            .field("worker", &self.worker.key())
            .field("piece_indices", &self.piece_indices)
            .finish()
    }
}

#[derive(Default)]
struct StateInner {
    unresolved: HashMap<String, UnresolvedWorker>,
    resolved: Vec<WorkerResponse>,
    wakeups: Vec<Trigger>,
}

/// Mutable discovery state shared between the gather loop and readers.
#[derive(Default)]
pub struct WorkerState {
    inner: Mutex<StateInner>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for a wakeup when another worker resolves. Returns `None`
    /// once nothing is unresolved: no further updates can happen in this
    /// generation, so there is nothing to wait for.
    pub fn register_for_worker_update(&self) -> Option<Listener> {
        let mut inner = self.lock_inner();
        if inner.unresolved.is_empty() {
            return None;
        }
        let (trigger, listener) = signal();
        inner.wakeups.push(trigger);
        Some(listener)
    }

    /// Settle one worker's response: drop it from the unresolved set, wake
    /// every registered listener, and append to the resolved list.
    pub fn handle_response(&self, resp: HasSectorResponse) {
        let mut inner = self.lock_inner();
        inner.unresolved.remove(resp.worker.key());
        for trigger in inner.wakeups.drain(..) {
            trigger.fire();
        }

        let piece_indices = match resp.err {
            Some(err) => {
                tracing::debug!(worker = resp.worker.key(), %err, "has-sector query failed");
                Vec::new()
            }
            None => resp
                .availables
                .iter()
                .enumerate()
                .filter_map(|(index, &available)| available.then_some(index as u64))
                .collect(),
        };
        inner.resolved.push(WorkerResponse {
            worker: resp.worker,
            piece_indices,
        });
    }

    /// Responses that arrived at or after index `start`, in arrival order.
    pub fn resolved_from(&self, start: usize) -> Vec<WorkerResponse> {
        let inner = self.lock_inner();
        inner.resolved.get(start..).unwrap_or_default().to_vec()
    }

    pub fn resolved_len(&self) -> usize {
        self.lock_inner().resolved.len()
    }

    pub fn unresolved_len(&self) -> usize {
        self.lock_inner().unresolved.len()
    }

    /// Snapshot of the workers still being waited on, for prioritization.
    pub fn unresolved_workers(&self) -> Vec<UnresolvedWorker> {
        self.lock_inner().unresolved.values().cloned().collect()
    }

    pub(crate) fn insert_unresolved(&self, unresolved: UnresolvedWorker) {
        let mut inner = self.lock_inner();
        inner
            .unresolved
            .insert(unresolved.worker.key().to_string(), unresolved);
    }

    fn lock_inner(&self) -> MutexGuard<'_, StateInner> {
        // A generation whose lock was poisoned is replaced on the next
        // refresh; keep serving the data that is there.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use crate::worker::{HasSectorJob, PriceTable, WorkerError};

    struct StubWorker {
        key: String,
    }

    impl Worker for StubWorker {
        fn key(&self) -> &str {
            &self.key
        }

        fn price_table(&self) -> PriceTable {
            PriceTable::default()
        }

        fn enqueue_has_sector(&self, _job: HasSectorJob) -> Result<Instant, WorkerError> {
            Ok(Instant::now())
        }
    }

    fn stub(key: &str) -> Arc<dyn Worker> {
        Arc::new(StubWorker {
            key: key.to_string(),
        })
    }

    fn unresolved(worker: &Arc<dyn Worker>) -> UnresolvedWorker {
        UnresolvedWorker {
            worker: Arc::clone(worker),
            expected_complete_time: Instant::now(),
        }
    }

    #[test]
    fn register_returns_none_with_nothing_unresolved() {
        let state = WorkerState::new();
        assert!(state.register_for_worker_update().is_none());
    }

    #[test]
    fn response_wakes_registered_listeners() {
        let state = Arc::new(WorkerState::new());
        let worker = stub("host-a");
        state.insert_unresolved(unresolved(&worker));

        let listener = state.register_for_worker_update().unwrap();
        assert!(!listener.fired());

        let waiter = {
            let listener = listener.clone();
            thread::spawn(move || listener.wait())
        };
        thread::sleep(Duration::from_millis(10));

        state.handle_response(HasSectorResponse {
            worker,
            availables: vec![true],
            err: None,
        });
        waiter.join().unwrap();
        assert!(listener.fired());
    }

    #[test]
    fn response_moves_the_worker_to_the_resolved_tail() {
        let state = WorkerState::new();
        let first = stub("host-a");
        let second = stub("host-b");
        state.insert_unresolved(unresolved(&first));
        state.insert_unresolved(unresolved(&second));

        state.handle_response(HasSectorResponse {
            worker: Arc::clone(&second),
            availables: vec![false, true, true],
            err: None,
        });
        assert_eq!(state.unresolved_len(), 1);
        assert_eq!(state.resolved_len(), 1);

        let resolved = state.resolved_from(0);
        assert_eq!(resolved[0].worker.key(), "host-b");
        assert_eq!(resolved[0].piece_indices, vec![1, 2]);

        state.handle_response(HasSectorResponse {
            worker: first,
            availables: vec![true, false, false],
            err: None,
        });
        let tail = state.resolved_from(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].worker.key(), "host-a");
        assert_eq!(tail[0].piece_indices, vec![0]);
    }

    #[test]
    fn errored_response_resolves_with_no_pieces() {
        let state = WorkerState::new();
        let worker = stub("host-a");
        state.insert_unresolved(unresolved(&worker));

        state.handle_response(HasSectorResponse {
            worker,
            availables: vec![true, true],
            err: Some(WorkerError::OnCooldown),
        });

        let resolved = state.resolved_from(0);
        assert!(resolved[0].piece_indices.is_empty());
        assert_eq!(state.unresolved_len(), 0);
    }

    #[test]
    fn no_registration_after_the_last_worker_resolves() {
        let state = WorkerState::new();
        let worker = stub("host-a");
        state.insert_unresolved(unresolved(&worker));
        assert!(state.register_for_worker_update().is_some());

        state.handle_response(HasSectorResponse {
            worker,
            availables: vec![],
            err: None,
        });
        assert!(state.register_for_worker_update().is_none());
    }
}
