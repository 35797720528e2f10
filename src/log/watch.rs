use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{Error, Result};
use crate::iterator::OverwriteIterator;
use crate::log::Inner;
use crate::slice::Slice;
use crate::types::Tid;

/// A committed transaction as delivered to watchers: its tid and the raw
/// update blocks, ready to be replayed with
/// [`Transaction::from_blocks`](crate::log::Transaction::from_blocks).
#[derive(Debug)]
pub struct CommittedTransaction {
    pub tid: Tid,
    pub blocks: Vec<Bytes>,
}

/// Receives every transaction committed after it was registered, in
/// commit order. Unregisters itself on drop.
pub struct Watcher {
    id: u64,
    rx: Receiver<Arc<CommittedTransaction>>,
    log: Weak<Inner>,
}

impl Watcher {
    pub(crate) fn new(id: u64, rx: Receiver<Arc<CommittedTransaction>>, log: Weak<Inner>) -> Self {
        Watcher { id, rx, log }
    }

    /// Block until the next transaction. Fails with `Shutdown` once the log
    /// is gone and the queue is drained.
    pub fn recv(&self) -> Result<Arc<CommittedTransaction>> {
        self.rx.recv().map_err(|_| Error::Shutdown)
    }

    pub fn try_recv(&self) -> Result<Option<Arc<CommittedTransaction>>> {
        match self.rx.try_recv() {
            Ok(txn) => Ok(Some(txn)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Shutdown),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Arc<CommittedTransaction>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(txn) => Ok(Some(txn)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Shutdown),
        }
    }

    /// Transactions queued and not yet received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(log) = self.log.upgrade() {
            log.state.lock().watchers.remove(&self.id);
        }
    }
}

/// Point-in-time view of every ushard's slices.
///
/// Holds its slices alive: merges that supersede them don't remove their
/// files until the snapshot is dropped.
pub struct Snapshot {
    tid: Tid,
    ushards: Vec<Vec<Arc<Slice>>>,
}

impl Snapshot {
    pub(crate) fn new(tid: Tid, ushards: Vec<Vec<Arc<Slice>>>) -> Self {
        Snapshot { tid, ushards }
    }

    /// Tid of the last transaction included.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn ushard_count(&self) -> usize {
        self.ushards.len()
    }

    pub fn slices(&self, ushard: usize) -> &[Arc<Slice>] {
        &self.ushards[ushard]
    }

    /// Newest version of every record of `ushard`.
    pub fn scan(&self, ushard: usize) -> Result<OverwriteIterator> {
        OverwriteIterator::new(self.slices(ushard))
    }

    /// Newest version of the records of `ushard` with keys in `[min, max]`.
    pub fn fetch(&self, ushard: usize, min: &[u8], max: &[u8]) -> Result<OverwriteIterator> {
        OverwriteIterator::range(self.slices(ushard), min, max)
    }
}
