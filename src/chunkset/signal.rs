//! One-shot broadcast signals.
//!
//! A fired signal stays fired, which is exactly what generation wakeups
//! need: once a worker state has no unresolved workers left there will
//! never be another wakeup for it, and late listeners must observe that
//! immediately instead of blocking.

use crossbeam::channel::{Receiver, Sender, TryRecvError, bounded};

/// Firing half of a one-shot broadcast. Dropping the trigger fires it.
pub struct Trigger {
    // Never sent on; disconnecting is the broadcast.
    _tx: Sender<()>,
}

/// Waiting half of a one-shot broadcast. Clones observe the same signal.
#[derive(Clone)]
pub struct Listener {
    rx: Receiver<()>,
}

/// Create a connected trigger/listener pair.
pub fn signal() -> (Trigger, Listener) {
    let (tx, rx) = bounded(0);
    (Trigger { _tx: tx }, Listener { rx })
}

impl Trigger {
    /// Wake every current and future listener.
    pub fn fire(self) {}
}

impl Listener {
    /// Block until the signal fires.
    pub fn wait(&self) {
        // The channel never carries a message; recv returns only once the
        // trigger is gone.
        let _ = self.rx.recv();
    }

    /// Whether the signal has already fired.
    pub fn fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// A listener whose signal has already fired.
    pub fn already_fired() -> Self {
        let (tx, rx) = bounded(0);
        drop(tx);
        Self { rx }
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
