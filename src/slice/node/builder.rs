use super::{ENTRY_SIZE, Entry, MAX_KEY_SIZE, MAX_KEYS, PAGE_SIZE, compress_block};
use crate::error::Result;

/// Accumulates sorted entries for one page and serializes them.
///
/// Every entry costs `ENTRY_SIZE + key.len() + value.len()` bytes of the
/// page budget. When a value doesn't fit whole and splitting is allowed,
/// the builder takes as much of it as the budget has left and reports how
/// many bytes it consumed; the caller continues the value on the next page.
///
/// Uniform key and value sizes are tracked so the keys and values blocks
/// can be byte-shuffled with the right stride before compression.
pub struct NodeBuilder {
    entries: Vec<Entry>,
    keys: Vec<u8>,
    values: Vec<u8>,
    available: usize,
    // None: no entries yet. Some(0): sizes differ.
    key_stride: Option<usize>,
    value_stride: Option<usize>,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        NodeBuilder {
            entries: Vec::new(),
            keys: Vec::new(),
            values: Vec::new(),
            available: PAGE_SIZE,
            key_stride: None,
            value_stride: None,
        }
    }

    /// Add an entry. Keys MUST arrive in sorted order.
    ///
    /// Returns `None` when the page is full: either `MAX_KEYS` entries are
    /// stored, the key doesn't fit, or `no_split` is set and the whole value
    /// doesn't fit. Otherwise returns how many bytes of `value` were stored.
    /// The stored fragment carries `eor` only when the whole value fit.
    pub fn add(
        &mut self,
        key: &[u8],
        value: &[u8],
        eor: bool,
        deleted: bool,
        meta: u64,
        no_split: bool,
    ) -> Option<usize> {
        debug_assert!(!key.is_empty() && key.len() < MAX_KEY_SIZE);

        if self.entries.len() >= MAX_KEYS {
            return None;
        }

        let required = ENTRY_SIZE + key.len() + if no_split { value.len() } else { 0 };
        if self.available < required {
            return None;
        }

        self.available -= ENTRY_SIZE + key.len();
        let partial = value.len().min(self.available);
        self.available -= partial;

        self.keys.extend_from_slice(key);
        self.values.extend_from_slice(&value[..partial]);

        self.entries.push(Entry {
            key_end: self.keys.len() as u16,
            eor: eor && partial == value.len(),
            value_end: self.values.len() as u16,
            deleted,
            meta,
        });

        self.key_stride = track_stride(self.key_stride, key.len());
        self.value_stride = track_stride(self.value_stride, partial);

        Some(partial)
    }

    /// Serialize the page onto `sink` and reset the builder.
    /// Returns the number of bytes appended.
    pub fn flush(&mut self, sink: &mut Vec<u8>) -> Result<usize> {
        let start = sink.len();

        let mut raw_entries = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for e in &self.entries {
            e.encode_into(&mut raw_entries);
        }

        sink.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        compress_block(&raw_entries, ENTRY_SIZE, sink)?;
        compress_block(&self.keys, self.key_stride.unwrap_or(0), sink)?;
        compress_block(&self.values, self.value_stride.unwrap_or(0), sink)?;

        self.reset();
        Ok(sink.len() - start)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Budget bytes still free on this page.
    pub fn available(&self) -> usize {
        self.available
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.keys.clear();
        self.values.clear();
        self.available = PAGE_SIZE;
        self.key_stride = None;
        self.value_stride = None;
    }
}

fn track_stride(current: Option<usize>, size: usize) -> Option<usize> {
    match current {
        None => Some(size),
        Some(s) if s == size => Some(s),
        Some(_) => Some(0),
    }
}
