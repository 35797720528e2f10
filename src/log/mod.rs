//! The transaction and compaction service.
//!
//! A [`Log`] owns `ushards` independent shards of slices. Every transaction
//! becomes at most one new slice per ushard it touches; background workers
//! then merge tiers that grow past `max_slices_per_tier`, keeping the slice
//! count logarithmic in the data size.
//!
//! Locking: one mutex guards the shard state. Slice I/O (writing a
//! transaction, merging, reading) never happens under it.

pub mod merge;
pub mod options;
pub mod update;
pub mod watch;

pub use options::Options;
pub use update::{Transaction, UpdateEntry};
pub use watch::{CommittedTransaction, Snapshot, Watcher};

use std::collections::btree_map::{BTreeMap, Entry};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::io::FileWriter;
use crate::iterator::OverwriteIterator;
use crate::slice::{Slice, SliceWriter};
use crate::types::Tid;
use crate::ushard::{MAX_TIERS, Ushard};
use merge::{MergeQueue, merge_id, open_committed, split_merge_id, write_merged};

/// Counters reported by [`Log::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub transactions: u64,
    pub merges: u64,
    pub compactions: u64,
    /// Records written by merges and compactions.
    pub merged_keys: u64,
    /// Bytes of slices written by merges and compactions.
    pub merged_bytes: u64,
    /// Slices currently live across all ushards.
    pub slices: u64,
    pub last_tid: Tid,
}

pub(crate) struct State {
    ushards: Vec<Ushard>,
    last_tid: Tid,
    slice_count: usize,
    // Arrival tickets: admission and commit both proceed in ticket order.
    next_ticket: u64,
    admit_ticket: u64,
    commit_ticket: u64,
    queue: MergeQueue,
    pub(crate) watchers: HashMap<u64, Sender<Arc<CommittedTransaction>>>,
    next_watcher: u64,
    terminated: bool,
    stats: LogStats,
}

impl State {
    /// Queue a merge of (ushard, tier). Returns true if a worker should be
    /// woken.
    fn request_merge(&mut self, ushard: usize, tier: usize) -> bool {
        let queued = self.queue.request(merge_id(ushard, tier));
        if queued {
            tracing::debug!(ushard, tier, queued = self.queue.len(), "merge requested");
        }
        queued
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.last_tid, self.ushards.iter().map(Ushard::get).collect())
    }
}

pub(crate) struct Inner {
    options: Options,
    pub(crate) state: Mutex<State>,
    /// Admission (backpressure) and commit turns.
    turn: Condvar,
    /// Merge queue became non-empty.
    merge_ready: Condvar,
    /// A merge or compaction released its tier locks.
    merge_done: Condvar,
}

/// An open engine instance. Dropping it shuts it down.
pub struct Log {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Log {
    /// Start a log writing slices into `options.dir`.
    ///
    /// Existing slice files in the directory are left alone; the new log
    /// starts empty.
    pub fn open(options: Options) -> Result<Log> {
        options.validate()?;
        fs::create_dir_all(&options.dir)?;

        let state = State {
            ushards: (0..options.ushards)
                .map(|_| Ushard::new(options.max_slices_per_tier))
                .collect(),
            last_tid: 0,
            slice_count: 0,
            next_ticket: 0,
            admit_ticket: 0,
            commit_ticket: 0,
            queue: MergeQueue::new(options.ushards),
            watchers: HashMap::new(),
            next_watcher: 0,
            terminated: false,
            stats: LogStats::default(),
        };

        let inner = Arc::new(Inner {
            options,
            state: Mutex::new(state),
            turn: Condvar::new(),
            merge_ready: Condvar::new(),
            merge_done: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(inner.options.merge_threads);
        for i in 0..inner.options.merge_threads {
            let worker = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("tyrdbs-merge-{i}"))
                .spawn(move || worker.merge_loop());
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    inner.terminate();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            dir = %inner.options.dir.display(),
            ushards = inner.options.ushards,
            merge_threads = inner.options.merge_threads,
            "log opened"
        );

        Ok(Log {
            inner,
            workers: Mutex::new(workers),
        })
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// A transaction with this log's block size.
    pub fn transaction(&self) -> Transaction {
        Transaction::with_block_size(self.inner.options.block_size)
    }

    /// Commit `txn`. Returns its tid.
    ///
    /// Waits while the live slice count exceeds `max_slices`. Transactions
    /// are admitted and committed in arrival order; a transaction that
    /// fails leaves no slices behind.
    pub fn update(&self, txn: Transaction) -> Result<Tid> {
        let inner = &self.inner;
        let blocks = txn.into_blocks()?;

        let ticket = {
            let mut state = inner.state.lock();
            if state.terminated {
                return Err(Error::Shutdown);
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;

            while !state.terminated
                && (state.admit_ticket != ticket || state.slice_count > inner.options.max_slices)
            {
                inner.turn.wait(&mut state);
            }
            if state.terminated {
                return Err(Error::Shutdown);
            }
            state.admit_ticket += 1;
            inner.turn.notify_all();
            ticket
        };

        let written = inner.write_slices(&blocks);

        let mut state = inner.state.lock();
        while !state.terminated && state.commit_ticket != ticket {
            inner.turn.wait(&mut state);
        }
        // A failed transaction gives up its turn like any other.
        state.commit_ticket += 1;
        inner.turn.notify_all();

        let slices = written?;
        if state.terminated {
            for (_, slice) in &slices {
                slice.unlink();
            }
            return Err(Error::Shutdown);
        }

        state.last_tid += 1;
        let tid = state.last_tid;

        let mut wake = false;
        let slice_count = slices.len();
        for (ushard, slice) in slices {
            let (tier, needs_merge) = state.ushards[ushard].add(Arc::new(slice.with_tid(tid)));
            state.slice_count += 1;
            if needs_merge {
                wake |= state.request_merge(ushard, tier);
            }
        }
        state.stats.transactions += 1;

        if !state.watchers.is_empty() {
            let committed = Arc::new(CommittedTransaction { tid, blocks });
            state
                .watchers
                .retain(|_, tx| tx.send(Arc::clone(&committed)).is_ok());
        }
        drop(state);

        if wake {
            inner.merge_ready.notify_all();
        }
        tracing::debug!(tid, slices = slice_count, "transaction committed");
        Ok(tid)
    }

    /// Newest version of every record of `ushard` with keys in `[min, max]`.
    pub fn fetch(&self, ushard: usize, min: &[u8], max: &[u8]) -> Result<OverwriteIterator> {
        self.check_ushard(ushard)?;
        let slices = self.inner.state.lock().ushards[ushard].get();
        OverwriteIterator::range(&slices, min, max)
    }

    /// Newest version of every record of `ushard`.
    pub fn scan(&self, ushard: usize) -> Result<OverwriteIterator> {
        self.check_ushard(ushard)?;
        let slices = self.inner.state.lock().ushards[ushard].get();
        OverwriteIterator::new(&slices)
    }

    /// Slices of every ushard as of the last committed transaction.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.lock().snapshot()
    }

    /// Receive every transaction committed from now on.
    pub fn watch(&self) -> Result<Watcher> {
        let mut state = self.inner.state.lock();
        self.register_watcher(&mut state)
    }

    /// Take a snapshot and register a watcher atomically: the watcher sees
    /// exactly the transactions the snapshot doesn't contain.
    pub fn watch_from_snapshot(&self) -> Result<(Snapshot, Watcher)> {
        let mut state = self.inner.state.lock();
        let watcher = self.register_watcher(&mut state)?;
        Ok((state.snapshot(), watcher))
    }

    /// Merge every slice of `ushard` into one, dropping tombstones.
    ///
    /// Waits for in-flight merges of the ushard to finish first.
    pub fn compact(&self, ushard: usize) -> Result<()> {
        self.check_ushard(ushard)?;
        let inner = &self.inner;

        let (slices, taken) = {
            let mut state = inner.state.lock();
            loop {
                if state.terminated {
                    return Err(Error::Shutdown);
                }
                if state.queue.try_lock_all(ushard) {
                    break;
                }
                inner.merge_done.wait(&mut state);
            }
            let shard = &state.ushards[ushard];
            let taken: Vec<usize> = (0..MAX_TIERS).map(|tier| shard.tier_len(tier)).collect();
            (shard.get(), taken)
        };

        let merged = write_merged(&inner.options.dir, &slices, true);

        let mut state = inner.state.lock();
        let merged = match merged {
            Ok(merged) => merged,
            Err(e) => {
                state.queue.unlock_all(ushard);
                drop(state);
                inner.merge_done.notify_all();
                tracing::error!(ushard, error = %e, "compaction failed");
                return Err(e);
            }
        };

        for (tier, &count) in taken.iter().enumerate() {
            state.ushards[ushard].remove(tier, count);
        }
        state.slice_count -= slices.len();

        let (keys, bytes) = merged
            .as_ref()
            .map_or((0, 0), |m| (m.key_count(), m.size()));
        if let Some(merged) = merged {
            state.ushards[ushard].add(Arc::new(merged));
            state.slice_count += 1;
        }
        state.queue.unlock_all(ushard);

        // Tiers that filled up while locked lost their requests.
        let mut wake = false;
        for tier in 0..MAX_TIERS {
            if state.ushards[ushard].needs_merge(tier) {
                wake |= state.request_merge(ushard, tier);
            }
        }

        state.stats.compactions += 1;
        state.stats.merged_keys += keys;
        state.stats.merged_bytes += bytes;
        inner.release_backpressure(&state);
        drop(state);

        inner.merge_done.notify_all();
        if wake {
            inner.merge_ready.notify_all();
        }

        for slice in &slices {
            slice.unlink();
        }
        tracing::info!(ushard, inputs = slices.len(), keys, bytes, "ushard compacted");
        Ok(())
    }

    pub fn stats(&self) -> LogStats {
        let state = self.inner.state.lock();
        LogStats {
            slices: state.slice_count as u64,
            last_tid: state.last_tid,
            ..state.stats
        }
    }

    /// Stop accepting work, wake every waiter, disconnect watchers and
    /// join the merge workers. Idempotent.
    pub fn shutdown(&self) {
        self.inner.terminate();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("merge worker panicked");
            }
        }
    }

    fn check_ushard(&self, ushard: usize) -> Result<()> {
        if ushard >= self.inner.options.ushards {
            return Err(Error::InvalidArgument(format!(
                "ushard {ushard} out of range (0..{})",
                self.inner.options.ushards
            )));
        }
        Ok(())
    }

    fn register_watcher(&self, state: &mut State) -> Result<Watcher> {
        if state.terminated {
            return Err(Error::Shutdown);
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = state.next_watcher;
        state.next_watcher += 1;
        state.watchers.insert(id, tx);
        Ok(Watcher::new(id, rx, Arc::downgrade(&self.inner)))
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        state.watchers.clear();
        drop(state);
        self.turn.notify_all();
        self.merge_ready.notify_all();
        self.merge_done.notify_all();
    }

    fn release_backpressure(&self, state: &State) {
        if state.slice_count <= self.options.max_slices {
            self.turn.notify_all();
        }
    }

    /// Decode `blocks` into one slice per touched ushard, written and
    /// opened in parallel. On failure nothing is left on disk.
    fn write_slices(&self, blocks: &[Bytes]) -> Result<Vec<(usize, Slice)>> {
        let ushards = self.options.ushards;
        let mut writers: BTreeMap<usize, SliceWriter<FileWriter>> = BTreeMap::new();

        for block in blocks {
            for entry in update::entries(block) {
                let entry = entry?;
                let id = entry.ushard as usize % ushards;
                let writer = match writers.entry(id) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(SliceWriter::create_in(&self.options.dir)?),
                };
                writer.add(entry.key, entry.value, entry.eor, entry.deleted, 0)?;
            }
        }

        let results: Vec<Result<(usize, Slice)>> = writers
            .into_par_iter()
            .map(|(id, mut writer)| {
                writer.flush()?;
                let file = writer.commit()?;
                Ok((id, open_committed(file)?))
            })
            .collect();

        let mut slices = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(slice) => slices.push(slice),
                Err(e) => failure = failure.or(Some(e)),
            }
        }
        match failure {
            None => Ok(slices),
            Some(e) => {
                for (_, slice) in &slices {
                    slice.unlink();
                }
                Err(e)
            }
        }
    }

    fn merge_loop(&self) {
        loop {
            let id = {
                let mut state = self.state.lock();
                loop {
                    if state.terminated {
                        return;
                    }
                    if let Some(id) = state.queue.pop() {
                        break id;
                    }
                    self.merge_ready.wait(&mut state);
                }
            };

            if let Err(e) = self.merge_tier(id) {
                let (ushard, tier) = split_merge_id(id);
                tracing::error!(ushard, tier, error = %e, "merge failed");
            }
            thread::yield_now();
        }
    }

    /// Merge one locked tier. Unlocks it when done.
    fn merge_tier(&self, id: usize) -> Result<()> {
        let (ushard, tier) = split_merge_id(id);

        let slices = {
            let mut state = self.state.lock();
            if !state.ushards[ushard].needs_merge(tier) {
                state.queue.unlock(id);
                drop(state);
                self.merge_done.notify_all();
                return Ok(());
            }
            state.ushards[ushard].get_tier(tier)
        };

        let merged = write_merged(&self.options.dir, &slices, false);

        let mut state = self.state.lock();
        state.queue.unlock(id);
        let merged = match merged {
            Ok(merged) => merged,
            Err(e) => {
                drop(state);
                self.merge_done.notify_all();
                return Err(e);
            }
        };

        let mut wake = false;
        if state.ushards[ushard].remove(tier, slices.len()) {
            wake |= state.request_merge(ushard, tier);
        }
        state.slice_count -= slices.len();

        let (keys, bytes) = merged
            .as_ref()
            .map_or((0, 0), |m| (m.key_count(), m.size()));
        let mut target = None;
        if let Some(merged) = merged {
            let (new_tier, needs_merge) = state.ushards[ushard].add(Arc::new(merged));
            state.slice_count += 1;
            if needs_merge {
                wake |= state.request_merge(ushard, new_tier);
            }
            target = Some(new_tier);
        }

        state.stats.merges += 1;
        state.stats.merged_keys += keys;
        state.stats.merged_bytes += bytes;
        self.release_backpressure(&state);
        drop(state);

        self.merge_done.notify_all();
        if wake {
            self.merge_ready.notify_all();
        }

        for slice in &slices {
            slice.unlink();
        }
        tracing::info!(
            ushard,
            tier,
            target_tier = ?target,
            inputs = slices.len(),
            keys,
            bytes,
            "tier merged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_out_of_range_ushard() {
        let dir = tempdir().unwrap();
        let log = Log::open(Options::new(dir.path()).ushards(2).merge_threads(0)).unwrap();
        assert!(matches!(log.fetch(2, b"a", b"z"), Err(Error::InvalidArgument(_))));
        assert!(matches!(log.compact(5), Err(Error::InvalidArgument(_))));
    }

    fn put(log: &Log, key: &[u8]) {
        let mut txn = log.transaction();
        txn.put(0, key, b"v");
        log.update(txn).unwrap();
    }

    #[test]
    fn requests_for_a_merging_tier_merge_once() {
        let dir = tempdir().unwrap();
        let log = Log::open(
            Options::new(dir.path())
                .ushards(1)
                .merge_threads(0)
                .max_slices_per_tier(2),
        )
        .unwrap();
        let id = merge_id(0, 0);

        // The third and fourth slice both ask for tier 0.
        for key in [b"a", b"b", b"c", b"d"] {
            put(&log, key);
        }
        {
            let mut state = log.inner.state.lock();
            assert_eq!(state.queue.len(), 1);
            assert_eq!(state.queue.pop(), Some(id));

            // Asked again while locked: dropped on pop.
            assert!(state.request_merge(0, 0));
            assert!(!state.request_merge(0, 0));
            assert_eq!(state.queue.pop(), None);
        }
        log.inner.merge_tier(id).unwrap();
        assert!(!log.inner.state.lock().queue.is_locked(id));

        let stats = log.stats();
        assert_eq!(stats.merges, 1);
        assert_eq!(stats.merged_keys, 4);
        assert_eq!(stats.slices, 1);

        // A request for a tier that is already within bounds merges nothing.
        {
            let mut state = log.inner.state.lock();
            assert!(state.request_merge(0, 0));
            assert_eq!(state.queue.pop(), Some(id));
        }
        log.inner.merge_tier(id).unwrap();
        assert_eq!(log.stats().merges, 1);

        // Refill the tier: the next drain is exactly one more merge.
        for key in [b"e", b"f"] {
            put(&log, key);
        }
        let popped = log.inner.state.lock().queue.pop();
        assert_eq!(popped, Some(id));
        log.inner.merge_tier(id).unwrap();

        let stats = log.stats();
        assert_eq!(stats.merges, 2);
        assert_eq!(stats.slices, 1);
        assert_eq!(log.inner.state.lock().queue.pop(), None);
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let dir = tempdir().unwrap();
        let log = Log::open(Options::new(dir.path()).merge_threads(1)).unwrap();
        let watcher = log.watch().unwrap();
        log.shutdown();
        log.shutdown();

        let mut txn = log.transaction();
        txn.put(0, b"k", b"v");
        assert!(matches!(log.update(txn), Err(Error::Shutdown)));
        assert!(matches!(watcher.recv(), Err(Error::Shutdown)));
        assert!(matches!(log.watch(), Err(Error::Shutdown)));
    }
}
