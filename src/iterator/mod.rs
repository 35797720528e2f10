pub mod merge;
pub mod overwrite;

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::Result;
use crate::slice::Slice;
use crate::types::{Record, Tid};

pub use merge::MergeIterator;
pub use overwrite::OverwriteIterator;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted source (one slice, a merged view of many) implements this
/// trait, so the merge iterators and the slice writer work over
/// `Box<dyn StorageIterator>` without caring where entries come from.
///
/// Iterators start positioned *before* the first entry: call `next()` and
/// read the accessors only while it returns `true`. Entries are physical:
/// a large value shows up as several consecutive entries with the same key,
/// all but the last with `eor() == false`.
pub trait StorageIterator {
    /// Advance to the next entry. Returns false once exhausted.
    fn next(&mut self) -> Result<bool>;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// True if this entry ends its record.
    fn eor(&self) -> bool;

    /// True for tombstones.
    fn deleted(&self) -> bool;

    /// Transaction that wrote the record.
    fn tid(&self) -> Tid;
}

pub type BoxedIterator = Box<dyn StorageIterator + Send>;

/// Sub-iterators kept sorted by key descending, tid ascending, so the tail
/// is always the smallest key at its newest version. Every iterator held
/// here is positioned on a valid entry.
pub(crate) struct SortedSources {
    iters: Vec<BoxedIterator>,
}

fn order(a: &BoxedIterator, b: &BoxedIterator) -> Ordering {
    b.key().cmp(a.key()).then(a.tid().cmp(&b.tid()))
}

impl SortedSources {
    /// Wrap already-positioned iterators. Call `sort()` before use.
    pub fn new(iters: Vec<BoxedIterator>) -> Self {
        SortedSources { iters }
    }

    /// Position fresh iterators on their first entry, dropping empty ones.
    pub fn prime(iters: Vec<BoxedIterator>) -> Result<Self> {
        let mut live = Vec::with_capacity(iters.len());
        for mut iter in iters {
            if iter.next()? {
                live.push(iter);
            }
        }
        Ok(Self::new(live))
    }

    pub fn sort(&mut self) {
        self.iters.sort_by(order);
    }

    pub fn tail(&self) -> Option<&BoxedIterator> {
        self.iters.last()
    }

    pub fn clear(&mut self) {
        self.iters.clear();
    }

    /// Advance the tail and put it back in place with one binary search,
    /// or drop it if it is exhausted.
    pub fn advance_tail(&mut self) -> Result<()> {
        let Some(mut iter) = self.iters.pop() else {
            return Ok(());
        };
        if iter.next()? {
            let pos = self
                .iters
                .partition_point(|other| order(other, &iter) == Ordering::Less);
            self.iters.insert(pos, iter);
        }
        Ok(())
    }
}

/// Open one iterator per slice in parallel, bounded to `[min, max]` when
/// bounds are given. Slices with nothing in range are left out.
pub(crate) fn open_slices(
    slices: &[Arc<Slice>],
    bounds: Option<(&[u8], &[u8])>,
) -> Result<Vec<BoxedIterator>> {
    let opened: Vec<Option<BoxedIterator>> = slices
        .par_iter()
        .map(|slice| -> Result<Option<BoxedIterator>> {
            let iter = match bounds {
                Some((min, max)) => slice.range(min, max)?,
                None => slice.begin()?,
            };
            Ok(iter.map(|it| Box::new(it) as BoxedIterator))
        })
        .collect::<Result<_>>()?;

    Ok(opened.into_iter().flatten().collect())
}

/// Drain `iter`, gluing value fragments back into whole records.
pub fn collect_records(iter: &mut dyn StorageIterator) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut value = Vec::new();
    while iter.next()? {
        value.extend_from_slice(iter.value());
        if iter.eor() {
            records.push(Record {
                key: iter.key().to_vec(),
                value: std::mem::take(&mut value),
                tid: iter.tid(),
                deleted: iter.deleted(),
            });
        }
    }
    Ok(records)
}

/// Accessors of a merge iterator read its tail source.
macro_rules! tail_accessors {
    () => {
        fn key(&self) -> &[u8] {
            self.sources.tail().map_or(&[][..], |t| t.key())
        }

        fn value(&self) -> &[u8] {
            self.sources.tail().map_or(&[][..], |t| t.value())
        }

        fn eor(&self) -> bool {
            self.sources.tail().is_some_and(|t| t.eor())
        }

        fn deleted(&self) -> bool {
            self.sources.tail().is_some_and(|t| t.deleted())
        }

        fn tid(&self) -> crate::types::Tid {
            self.sources.tail().map_or(0, |t| t.tid())
        }
    };
}

pub(crate) use tail_accessors;
