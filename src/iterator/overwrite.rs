use std::sync::Arc;

use crate::error::Result;
use crate::iterator::{BoxedIterator, SortedSources, StorageIterator, open_slices, tail_accessors};
use crate::slice::Slice;

/// K-way merge that resolves overwrites.
///
/// For every key only the version with the highest tid is yielded; older
/// versions are skipped. A record spanning several fragments is yielded
/// fragment by fragment from the one source that holds the winning
/// version. Tombstones are yielded like any record: dropping them is the
/// compacting writer's job.
pub struct OverwriteIterator {
    sources: SortedSources,
    max: Option<Vec<u8>>,
    last_key: Vec<u8>,
    started: bool,
}

impl OverwriteIterator {
    /// Merge the whole of `slices`.
    pub fn new(slices: &[Arc<Slice>]) -> Result<Self> {
        Self::build(open_slices(slices, None)?, None)
    }

    /// Merge the records of `slices` with keys in `[min, max]`.
    pub fn range(slices: &[Arc<Slice>], min: &[u8], max: &[u8]) -> Result<Self> {
        Self::build(open_slices(slices, Some((min, max)))?, Some(max.to_vec()))
    }

    /// Merge arbitrary sorted sources.
    pub fn from_iterators(iters: Vec<BoxedIterator>) -> Result<Self> {
        Self::build(iters, None)
    }

    fn build(iters: Vec<BoxedIterator>, max: Option<Vec<u8>>) -> Result<Self> {
        Ok(OverwriteIterator {
            sources: SortedSources::prime(iters)?,
            max,
            last_key: Vec::new(),
            started: false,
        })
    }

    fn advance(&mut self) -> Result<()> {
        let Some(tail) = self.sources.tail() else {
            return Ok(());
        };

        if !tail.eor() {
            // Mid-record: the next fragment comes from the same source.
            return self.sources.advance_tail();
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(tail.key());
        self.sources.advance_tail()?;

        // Older versions of the key just finished.
        while self
            .sources
            .tail()
            .is_some_and(|t| t.key() == self.last_key.as_slice())
        {
            self.sources.advance_tail()?;
        }
        Ok(())
    }
}

impl StorageIterator for OverwriteIterator {
    fn next(&mut self) -> Result<bool> {
        if self.started {
            self.advance()?;
        } else {
            self.started = true;
            self.sources.sort();
        }

        let Some(tail) = self.sources.tail() else {
            return Ok(false);
        };
        if let Some(max) = &self.max {
            if tail.key() > max.as_slice() {
                self.sources.clear();
                return Ok(false);
            }
        }
        Ok(true)
    }

    tail_accessors!();
}
