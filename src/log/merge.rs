use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::io::{FileReader, FileWriter, Writer};
use crate::iterator::OverwriteIterator;
use crate::slice::{Slice, SliceWriter};
use crate::ushard::MAX_TIERS;

/// Identifies one (ushard, tier) pair in the merge queue.
pub(crate) fn merge_id(ushard: usize, tier: usize) -> usize {
    ushard * MAX_TIERS + tier
}

pub(crate) fn split_merge_id(id: usize) -> (usize, usize) {
    (id / MAX_TIERS, id % MAX_TIERS)
}

/// FIFO of pending tier merges.
///
/// A request already waiting in the queue is not queued twice (`filter`).
/// A tier being merged is `locked`; requests for it popped meanwhile are
/// dropped, and the merge re-requests its tier on completion if it still
/// exceeds the threshold.
pub(crate) struct MergeQueue {
    filter: Vec<bool>,
    locks: Vec<bool>,
    requests: VecDeque<usize>,
}

impl MergeQueue {
    pub fn new(ushards: usize) -> Self {
        MergeQueue {
            filter: vec![false; ushards * MAX_TIERS],
            locks: vec![false; ushards * MAX_TIERS],
            requests: VecDeque::new(),
        }
    }

    /// Queue a merge. Returns false if one is already queued.
    pub fn request(&mut self, id: usize) -> bool {
        if self.filter[id] {
            return false;
        }
        self.filter[id] = true;
        self.requests.push_back(id);
        true
    }

    /// Pop the next request whose tier is free and lock that tier.
    pub fn pop(&mut self) -> Option<usize> {
        while let Some(id) = self.requests.pop_front() {
            self.filter[id] = false;
            if self.locks[id] {
                continue;
            }
            self.locks[id] = true;
            return Some(id);
        }
        None
    }

    pub fn unlock(&mut self, id: usize) {
        self.locks[id] = false;
    }

    #[cfg(test)]
    pub fn is_locked(&self, id: usize) -> bool {
        self.locks[id]
    }

    /// Lock every tier of `ushard`, or none if any is busy.
    pub fn try_lock_all(&mut self, ushard: usize) -> bool {
        let tiers = merge_id(ushard, 0)..merge_id(ushard + 1, 0);
        if self.locks[tiers.clone()].iter().any(|&locked| locked) {
            return false;
        }
        self.locks[tiers].fill(true);
        true
    }

    pub fn unlock_all(&mut self, ushard: usize) {
        self.locks[merge_id(ushard, 0)..merge_id(ushard + 1, 0)].fill(false);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Open a slice that was just committed to `file`. The file is removed if
/// it can't be opened.
pub(crate) fn open_committed(mut file: FileWriter) -> Result<Slice> {
    let opened =
        FileReader::open(file.path()).and_then(|reader| Slice::open(reader, file.offset()));
    if opened.is_err() {
        if let Err(e) = file.unlink() {
            tracing::warn!(
                path = %file.path().display(),
                error = %e,
                "failed to unlink unreadable slice"
            );
        }
    }
    opened
}

/// Merge `slices` into one new slice in `dir`, newest version of each key
/// winning. With `compact` tombstones are dropped. Returns `None` when
/// nothing is left to store.
pub(crate) fn write_merged(
    dir: &Path,
    slices: &[Arc<Slice>],
    compact: bool,
) -> Result<Option<Slice>> {
    let mut iter = OverwriteIterator::new(slices)?;
    let mut writer = SliceWriter::create_in(dir)?;
    writer.add_iter(&mut iter, compact)?;
    writer.flush()?;

    let key_count = writer.key_count();
    let mut file = writer.commit()?;
    if key_count == 0 {
        file.unlink()?;
        return Ok(None);
    }
    open_committed(file).map(Some)
}
