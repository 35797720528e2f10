use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::slice::location::Location;
use crate::slice::node::Node;
use crate::slice::reader::Slice;
use crate::types::Tid;

/// Forward iterator over the physical entries of one slice.
///
/// Holds one decoded leaf at a time. When the leaf is exhausted it follows
/// the size markers to the next leaf page, skipping interleaved index pages.
pub struct SliceIterator {
    slice: Arc<Slice>,
    loc: Location,
    node: Node,
    ndx: usize,
    max: Option<Vec<u8>>,
    // Positioned on an entry that next() has not reported yet.
    pending: bool,
    done: bool,
}

impl SliceIterator {
    pub(crate) fn new(
        slice: Arc<Slice>,
        loc: Location,
        node: Node,
        ndx: usize,
        max: Option<Vec<u8>>,
    ) -> Self {
        SliceIterator {
            slice,
            loc,
            node,
            ndx,
            max,
            pending: true,
            done: false,
        }
    }

    pub fn slice(&self) -> &Arc<Slice> {
        &self.slice
    }
}

impl StorageIterator for SliceIterator {
    fn next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        if self.pending {
            self.pending = false;
        } else {
            self.ndx += 1;
        }

        while self.ndx >= self.node.key_count() {
            match self.slice.next_leaf(self.loc)? {
                Some(loc) => {
                    self.node = self.slice.load(loc)?;
                    self.loc = loc;
                    self.ndx = 0;
                }
                None => {
                    self.done = true;
                    return Ok(false);
                }
            }
        }

        if let Some(max) = &self.max {
            if self.node.key_at(self.ndx) > max.as_slice() {
                self.done = true;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        self.node.key_at(self.ndx)
    }

    fn value(&self) -> &[u8] {
        self.node.value_at(self.ndx)
    }

    fn eor(&self) -> bool {
        self.node.eor_at(self.ndx)
    }

    fn deleted(&self) -> bool {
        self.node.deleted_at(self.ndx)
    }

    fn tid(&self) -> Tid {
        match self.node.meta_at(self.ndx) {
            0 => self.slice.tid(),
            tid => tid,
        }
    }
}
