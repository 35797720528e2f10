use std::cmp::Ordering;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};
use crate::io::{FileWriter, Writer};
use crate::iterator::StorageIterator;
use crate::slice::header::Header;
use crate::slice::location::{INVALID_SIZE, Location, MAX_OFFSET, MAX_SIZE, size_marker};
use crate::slice::node::{MAX_KEY_SIZE, NodeBuilder, PAGE_SIZE};
use crate::types::Tid;

/// Builds a slice from a sorted stream of (possibly fragmented) records.
///
/// Build process:
/// 1. Records are added in key order; large values spill over into the
///    next leaf page as `eor = false` fragments.
/// 2. Each full leaf is written out, and its [first key, last key] range
///    is pushed into the index chain.
/// 3. `flush()` writes the last leaf, the index levels up to the root and
///    the header.
/// 4. `commit()` hands the writer back. Dropping the slice writer before
///    that removes the partial file.
pub struct SliceWriter<W: Writer> {
    pages: PageStore<W>,
    leaf: NodeBuilder,
    index: IndexLevel,
    /// First key on the current leaf page.
    page_first_key: Vec<u8>,
    /// Key of the last entry added. Also the last key on the current leaf
    /// while that leaf has entries.
    last_key: Vec<u8>,
    last_eor: bool,
    key_count: u64,
    flushed: bool,
    committed: bool,
}

impl SliceWriter<FileWriter> {
    /// Start a slice at `path`. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(FileWriter::create(path)?))
    }

    /// Start a randomly named slice inside `dir`.
    pub fn create_in(dir: &Path) -> Result<Self> {
        Ok(Self::new(FileWriter::create_in(dir)?))
    }
}

impl<W: Writer> SliceWriter<W> {
    pub fn new(writer: W) -> Self {
        SliceWriter {
            pages: PageStore::new(writer),
            leaf: NodeBuilder::new(),
            index: IndexLevel::new(),
            page_first_key: Vec::new(),
            last_key: Vec::new(),
            last_eor: true,
            key_count: 0,
            flushed: false,
            committed: false,
        }
    }

    /// Add one record or record fragment. Keys MUST arrive in sorted order;
    /// fragments of one value arrive as consecutive calls with the same key,
    /// all but the last with `eor = false`.
    pub fn add(
        &mut self,
        key: &[u8],
        value: &[u8],
        eor: bool,
        deleted: bool,
        tid: Tid,
    ) -> Result<()> {
        if self.flushed {
            return Err(Error::InvalidState("slice writer already flushed".into()));
        }
        let new_key = self.check(key, value, eor, deleted)?;

        let mut value = value;
        loop {
            if let Some(consumed) = self.leaf.add(key, value, eor, deleted, tid, false) {
                if self.leaf.len() == 1 {
                    self.page_first_key.clear();
                    self.page_first_key.extend_from_slice(key);
                }
                if self.last_key != key {
                    self.last_key.clear();
                    self.last_key.extend_from_slice(key);
                }
                value = &value[consumed..];
                if value.is_empty() {
                    break;
                }
            }
            // Page is full. What's left of the value continues on the next one.
            self.store_leaf()?;
        }

        debug_assert!(!new_key || self.last_key == key);
        self.last_eor = eor;
        if eor {
            self.key_count += 1;
        }
        Ok(())
    }

    /// Copy everything `iter` yields. With `compact` set, tombstones are
    /// dropped instead of written.
    pub fn add_iter(&mut self, iter: &mut dyn StorageIterator, compact: bool) -> Result<()> {
        while iter.next()? {
            if compact && iter.deleted() {
                continue;
            }
            self.add(iter.key(), iter.value(), iter.eor(), iter.deleted(), iter.tid())?;
        }
        Ok(())
    }

    /// Write the last leaf, the index and the header, then sync.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Err(Error::InvalidState("slice writer already flushed".into()));
        }
        if !self.last_eor {
            return Err(Error::InvalidData("incomplete trailing record".into()));
        }

        if !self.leaf.is_empty() || self.pages.header.stats.total_nodes == 0 {
            self.store_leaf()?;
        }
        self.pages.write_marker(INVALID_SIZE)?;

        let root = self.index.flush(&mut self.pages)?;
        self.pages.write_marker(INVALID_SIZE)?;

        self.pages.header.root = root;
        self.pages.header.stats.key_count = self.key_count;
        let header = self.pages.header.encode();
        self.pages.write(&header)?;
        self.pages.writer()?.flush()?;

        self.flushed = true;
        Ok(())
    }

    /// Finish the slice and hand back the underlying writer.
    pub fn commit(mut self) -> Result<W> {
        if !self.flushed {
            return Err(Error::InvalidState("slice writer not flushed".into()));
        }
        self.committed = true;
        self.pages
            .writer
            .take()
            .ok_or_else(|| Error::InvalidState("slice writer already committed".into()))
    }

    /// Logical records written so far.
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.pages.writer.as_ref().map_or(0, |w| w.offset())
    }

    /// Returns whether `key` starts a new record.
    fn check(&self, key: &[u8], value: &[u8], eor: bool, deleted: bool) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::InvalidData("key of zero length not allowed".into()));
        }
        if key.len() >= MAX_KEY_SIZE {
            return Err(Error::InvalidData(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                MAX_KEY_SIZE - 1
            )));
        }

        let new_key = match key.cmp(self.last_key.as_slice()) {
            Ordering::Less => {
                return Err(Error::InvalidData("input keys not sorted".into()));
            }
            Ordering::Equal => {
                if self.last_eor || deleted {
                    return Err(Error::InvalidData("duplicate keys".into()));
                }
                false
            }
            Ordering::Greater => {
                if !self.last_eor {
                    return Err(Error::InvalidData("key eor mismatch".into()));
                }
                true
            }
        };

        if deleted && (!eor || !value.is_empty()) {
            return Err(Error::InvalidData("invalid combination of key attributes".into()));
        }

        Ok(new_key)
    }

    /// Write the current leaf and index it.
    fn store_leaf(&mut self) -> Result<()> {
        let has_keys = !self.leaf.is_empty();
        let loc = self.pages.store(&mut self.leaf, true)?;
        if has_keys {
            self.index.add(&mut self.pages, &self.page_first_key, &self.last_key, loc)?;
        }
        Ok(())
    }
}

impl<W: Writer> Drop for SliceWriter<W> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(writer) = self.pages.writer.as_mut() {
            if let Err(e) = writer.unlink() {
                tracing::warn!(error = %e, "failed to unlink abandoned slice");
            }
        }
    }
}

/// Owns the output and the header statistics; every page goes through here.
struct PageStore<W: Writer> {
    writer: Option<W>,
    header: Header,
    scratch: Vec<u8>,
}

impl<W: Writer> PageStore<W> {
    fn new(writer: W) -> Self {
        PageStore {
            writer: Some(writer),
            header: Header::default(),
            scratch: Vec::with_capacity(PAGE_SIZE),
        }
    }

    fn writer(&mut self) -> Result<&mut W> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::InvalidState("slice writer already committed".into()))
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let written = self.writer()?.write(data)?;
        if written != data.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", data.len()),
            )));
        }
        Ok(())
    }

    fn write_marker(&mut self, marker: u64) -> Result<()> {
        self.write(&marker.to_le_bytes())
    }

    /// Serialize `node`, write `[marker][crc32c][page]` and return where
    /// the page landed. The very first page has no marker in front of it;
    /// its marker goes into the header instead.
    fn store(&mut self, node: &mut NodeBuilder, is_leaf: bool) -> Result<Location> {
        let mut page = std::mem::take(&mut self.scratch);
        page.clear();
        let size = node.flush(&mut page)?;

        if size > MAX_SIZE as usize {
            return Err(Error::InvalidState(format!("page of {size} bytes is too large")));
        }
        let marker = size_marker(size as u32, is_leaf);

        if self.header.stats.total_nodes == 0 {
            self.header.first_page_size = marker as u16;
        } else {
            self.write_marker(marker)?;
        }

        let offset = self.writer()?.offset();
        if offset > MAX_OFFSET {
            return Err(Error::InvalidState("slice too large".into()));
        }

        self.write(&crc32c::crc32c(&page).to_le_bytes())?;
        self.write(&page)?;
        self.scratch = page;

        let stats = &mut self.header.stats;
        stats.compressed_size += size as u64;
        stats.uncompressed_size += PAGE_SIZE as u64;
        stats.total_nodes += 1;
        if is_leaf {
            stats.leaf_nodes += 1;
        }

        Ok(Location::new(offset, size as u32, is_leaf))
    }
}

/// One level of the index. Entries map `[first key, last key]` of a child
/// page to its location. A level that fills up writes itself out and
/// pushes its own range into the next level, created on first use.
struct IndexLevel {
    node: NodeBuilder,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    higher: Option<Box<IndexLevel>>,
}

impl IndexLevel {
    fn new() -> Self {
        IndexLevel {
            node: NodeBuilder::new(),
            first_key: Vec::new(),
            last_key: Vec::new(),
            higher: None,
        }
    }

    fn add<W: Writer>(
        &mut self,
        pages: &mut PageStore<W>,
        min: &[u8],
        max: &[u8],
        loc: Location,
    ) -> Result<()> {
        if self.node.add(min, max, true, false, loc.raw(), true).is_none() {
            let own = pages.store(&mut self.node, false)?;
            let higher = self.higher.get_or_insert_with(|| Box::new(IndexLevel::new()));
            higher.add(pages, &self.first_key, &self.last_key, own)?;

            if self.node.add(min, max, true, false, loc.raw(), true).is_none() {
                return Err(Error::InvalidState("index entry does not fit an empty page".into()));
            }
        }

        if self.node.len() == 1 {
            self.first_key.clear();
            self.first_key.extend_from_slice(min);
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(max);
        Ok(())
    }

    /// Write this level and everything above it. Returns the root.
    fn flush<W: Writer>(&mut self, pages: &mut PageStore<W>) -> Result<Location> {
        let own = pages.store(&mut self.node, false)?;
        match self.higher.as_mut() {
            None => Ok(own),
            Some(higher) => {
                higher.add(pages, &self.first_key, &self.last_key, own)?;
                higher.flush(pages)
            }
        }
    }
}
