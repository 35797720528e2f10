use std::sync::Arc;

use crate::error::Result;
use crate::iterator::{BoxedIterator, SortedSources, StorageIterator, open_slices, tail_accessors};
use crate::slice::Slice;

/// Merges multiple sorted sources into a single sorted stream.
///
/// Ordering guarantee: entries are yielded in (key ASC, tid DESC) order and
/// the fragments of one record stay together. Nothing is deduplicated:
/// every stored version of every key comes out, tombstones included. Used
/// to audit a set of slices; reads and merges go through
/// [`OverwriteIterator`](crate::iterator::OverwriteIterator).
pub struct MergeIterator {
    sources: SortedSources,
    started: bool,
}

impl MergeIterator {
    pub fn new(slices: &[Arc<Slice>]) -> Result<Self> {
        Self::from_iterators(open_slices(slices, None)?)
    }

    pub fn range(slices: &[Arc<Slice>], min: &[u8], max: &[u8]) -> Result<Self> {
        Self::from_iterators(open_slices(slices, Some((min, max)))?)
    }

    pub fn from_iterators(iters: Vec<BoxedIterator>) -> Result<Self> {
        Ok(MergeIterator {
            sources: SortedSources::prime(iters)?,
            started: false,
        })
    }
}

impl StorageIterator for MergeIterator {
    fn next(&mut self) -> Result<bool> {
        if self.started {
            self.sources.advance_tail()?;
        } else {
            self.started = true;
            self.sources.sort();
        }
        Ok(self.sources.tail().is_some())
    }

    tail_accessors!();
}
