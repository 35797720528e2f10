use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::io::{FileReader, Reader};
use crate::slice::header::{Header, Stats};
use crate::slice::iterator::SliceIterator;
use crate::slice::location::{INVALID_SIZE, Location, split_marker};
use crate::slice::node::Node;
use crate::types::Tid;

/// A finished, immutable slice opened for reading.
///
/// Shared as `Arc<Slice>` between the tier it lives in and every iterator
/// reading it. `unlink()` only marks the slice; the file goes away when the
/// last reference is dropped, so readers holding a snapshot keep working.
pub struct Slice {
    reader: Box<dyn Reader>,
    size: u64,
    header: Header,
    tid: Tid,
    unlinked: AtomicBool,
}

impl Slice {
    /// Open a slice of `size` bytes. Reads and validates the header at the
    /// tail of the data.
    pub fn open(reader: impl Reader + 'static, size: u64) -> Result<Self> {
        if size < Header::SIZE as u64 {
            return Err(Error::Corruption(format!("slice of {size} bytes has no header")));
        }

        let mut raw = [0u8; Header::SIZE];
        let offset = size - Header::SIZE as u64;
        let n = reader.pread(offset, &mut raw)?;
        if n != raw.len() {
            return Err(Error::Corruption("short read on slice header".into()));
        }

        let header = Header::decode(&raw)?;
        if !header.root.is_valid() || header.root.end() > offset {
            return Err(Error::Corruption("slice root location out of range".into()));
        }

        Ok(Slice {
            reader: Box::new(reader),
            size,
            header,
            tid: 0,
            unlinked: AtomicBool::new(false),
        })
    }

    /// Open a slice file, taking its size from the file system.
    pub fn open_file(path: &Path) -> Result<Self> {
        let reader = FileReader::open(path)?;
        let size = reader.len()?;
        Self::open(reader, size)
    }

    /// Set the tid reported by entries that were written without one.
    pub fn with_tid(mut self, tid: Tid) -> Self {
        self.tid = tid;
        self
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Logical records stored, tombstones included.
    pub fn key_count(&self) -> u64 {
        self.header.stats.key_count
    }

    pub fn stats(&self) -> Stats {
        self.header.stats
    }

    /// Size of the slice in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Iterate the records with keys in `[min, max]`. Returns `None` when
    /// the slice cannot hold any such key.
    pub fn range(self: &Arc<Self>, min: &[u8], max: &[u8]) -> Result<Option<SliceIterator>> {
        if min > max {
            return Ok(None);
        }
        self.seek(min, Some(max))
    }

    /// Iterate the whole slice.
    pub fn begin(self: &Arc<Self>) -> Result<Option<SliceIterator>> {
        if self.key_count() == 0 {
            return Ok(None);
        }
        let (size, is_leaf) = split_marker(self.header.first_page_size as u64);
        let loc = Location::new(0, size, is_leaf);
        if !is_leaf {
            return Err(Error::Corruption("first page of slice is not a leaf".into()));
        }
        let node = self.load(loc)?;
        Ok(Some(SliceIterator::new(Arc::clone(self), loc, node, 0, None)))
    }

    /// Mark the slice for removal once the last reference is gone.
    pub fn unlink(&self) {
        self.unlinked.store(true, Ordering::Release);
    }

    fn seek(self: &Arc<Self>, min: &[u8], max: Option<&[u8]>) -> Result<Option<SliceIterator>> {
        let mut loc = self.header.root;
        loop {
            let node = self.load(loc)?;
            let mut ndx = node.lower_bound(min);

            if loc.is_leaf() {
                return Ok(Some(SliceIterator::new(
                    Arc::clone(self),
                    loc,
                    node,
                    ndx,
                    max.map(<[u8]>::to_vec),
                )));
            }

            // Index entries are [min key, max key] of the child. The entry
            // just before the lower bound may still cover `min`.
            if ndx > 0 && node.value_at(ndx - 1) >= min {
                ndx -= 1;
            }
            if ndx == node.key_count() {
                return Ok(None);
            }
            if let Some(max) = max {
                if node.key_at(ndx) > max {
                    return Ok(None);
                }
            }
            loc = Location::from_raw(node.meta_at(ndx));
        }
    }

    /// Load and verify the page at `loc`.
    pub(crate) fn load(&self, loc: Location) -> Result<Node> {
        if loc.end() > self.size {
            return Err(Error::Corruption(format!(
                "page at {} extends past end of slice",
                loc.offset()
            )));
        }

        let mut buf = vec![0u8; 4 + loc.size() as usize];
        let n = self.reader.pread(loc.offset(), &mut buf)?;
        if n != buf.len() {
            return Err(Error::Corruption(format!("short read on page at {}", loc.offset())));
        }

        let stored = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let actual = crc32c::crc32c(&buf[4..]);
        if stored != actual {
            return Err(Error::Corruption(format!(
                "page checksum mismatch at {}: stored {:#010x}, computed {:#010x}",
                loc.offset(),
                stored,
                actual
            )));
        }

        Node::load(&buf[4..])
    }

    /// Location of the first leaf page stored after `loc`, skipping index
    /// pages. `None` once the run of pages ends.
    pub(crate) fn next_leaf(&self, loc: Location) -> Result<Option<Location>> {
        let mut pos = loc.end();
        loop {
            let marker = self.read_marker(pos)?;
            if marker == INVALID_SIZE {
                return Ok(None);
            }
            let page = Location::after_marker(pos, marker);
            if page.is_leaf() {
                return Ok(Some(page));
            }
            pos = page.end();
        }
    }

    fn read_marker(&self, pos: u64) -> Result<u64> {
        let mut raw = [0u8; 8];
        if pos + 8 > self.size || self.reader.pread(pos, &mut raw)? != 8 {
            return Err(Error::Corruption(format!("missing page marker at {pos}")));
        }
        Ok(u64::from_le_bytes(raw))
    }
}

impl Drop for Slice {
    fn drop(&mut self) {
        if self.unlinked.load(Ordering::Acquire) {
            if let Err(e) = self.reader.unlink() {
                tracing::warn!(error = %e, "failed to unlink slice");
            }
        }
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("size", &self.size)
            .field("tid", &self.tid)
            .field("stats", &self.header.stats)
            .finish()
    }
}
