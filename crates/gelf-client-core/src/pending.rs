//! Bookkeeping of in-flight deliveries so `flush` can await them.
//!
//! One-shot sends register their spawned task; stream sends register a
//! completion signal the connection task fires when the record is finally
//! written or failed out. Either way the operation resolves, success or
//! not, so a flush can never hang on an absorbed error.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Completion guard paired with a queued stream record.
///
/// Fires its signal when completed explicitly or when dropped, so a
/// torn-down connection task can never leave a flush waiting.
#[derive(Debug)]
pub(crate) struct Completion {
    signal: Option<oneshot::Sender<()>>,
}

impl Completion {
    /// Creates a guard and the receiver to park in the pending set.
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (signal, receiver) = oneshot::channel();
        (
            Self {
                signal: Some(signal),
            },
            receiver,
        )
    }

    /// Marks the operation finished.
    pub(crate) fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.fire();
    }
}

/// One trackable delivery operation.
#[derive(Debug)]
enum PendingOp {
    /// A spawned one-shot send.
    Task(JoinHandle<()>),
    /// A queued stream record, resolved by its [`Completion`].
    Signal(oneshot::Receiver<()>),
}

impl PendingOp {
    fn is_finished(&mut self) -> bool {
        match self {
            PendingOp::Task(handle) => handle.is_finished(),
            PendingOp::Signal(receiver) => !matches!(
                receiver.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ),
        }
    }
}

/// The set of deliveries dispatched but not yet resolved.
#[derive(Debug, Default)]
pub(crate) struct PendingOps {
    ops: Mutex<Vec<PendingOp>>,
}

impl PendingOps {
    /// Registers a spawned one-shot send.
    pub(crate) fn track_task(&self, handle: JoinHandle<()>) {
        self.insert(PendingOp::Task(handle));
    }

    /// Registers a queued stream record.
    pub(crate) fn track_signal(&self, receiver: oneshot::Receiver<()>) {
        self.insert(PendingOp::Signal(receiver));
    }

    /// Number of operations currently tracked (resolved entries may still
    /// be counted until the next registration or flush prunes them).
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn insert(&self, op: PendingOp) {
        let mut ops = self.lock();
        // Prune resolved entries so idle periods do not accumulate
        // bookkeeping between flushes.
        ops.retain_mut(|existing| !existing.is_finished());
        ops.push(op);
    }

    /// Awaits every operation dispatched before this call, absorbing
    /// failures. Operations dispatched while flushing belong to the next
    /// flush.
    pub(crate) async fn flush(&self) {
        let ops: Vec<PendingOp> = std::mem::take(&mut *self.lock());
        for op in ops {
            match op {
                PendingOp::Task(handle) => {
                    let _ = handle.await;
                }
                PendingOp::Signal(receiver) => {
                    let _ = receiver.await;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingOp>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
