//! One page of sorted entries and its compressed on-disk form.
//!
//! On-disk layout of a page:
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ Entry count (2B)                                      │
//! ├───────────────────────────────────────────────────────┤
//! │ Entries block: [csize(2B)][frame]  stride = 12        │
//! │ Keys block:    [csize(2B)][frame]  stride = key size  │
//! │ Values block:  [csize(2B)][frame]  stride = value size│
//! └───────────────────────────────────────────────────────┘
//!
//! frame = [raw_len(2B)][stride(2B)][lz4 payload of shuffled bytes]
//! ```
//!
//! An entry is 12 packed bytes:
//! `[key_end:15|eor:1][value_end:15|deleted:1][meta:64]`. Keys and values
//! live in two shared blobs; each entry records where its key and value
//! end, the start is the previous entry's end.

pub mod builder;

pub use builder::NodeBuilder;

use crate::error::{Error, Result};

/// Page budget: entries, keys and values together never exceed this.
pub const PAGE_SIZE: usize = 16384;

/// Keys must be strictly shorter than this.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum entries per page.
pub const MAX_KEYS: usize = 1024;

/// Packed size of one entry.
pub const ENTRY_SIZE: usize = 12;

const OFFSET_MASK: u16 = 0x7FFF;
const FLAG_BIT: u16 = 0x8000;

/// Decoded form of one packed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub key_end: u16,
    pub eor: bool,
    pub value_end: u16,
    pub deleted: bool,
    pub meta: u64,
}

impl Entry {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let key_word = (self.key_end & OFFSET_MASK) | if self.eor { FLAG_BIT } else { 0 };
        let value_word =
            (self.value_end & OFFSET_MASK) | if self.deleted { FLAG_BIT } else { 0 };
        buf.extend_from_slice(&key_word.to_le_bytes());
        buf.extend_from_slice(&value_word.to_le_bytes());
        buf.extend_from_slice(&self.meta.to_le_bytes());
    }

    pub fn decode(raw: &[u8]) -> Self {
        let key_word = u16::from_le_bytes([raw[0], raw[1]]);
        let value_word = u16::from_le_bytes([raw[2], raw[3]]);
        let mut meta = [0u8; 8];
        meta.copy_from_slice(&raw[4..ENTRY_SIZE]);

        Entry {
            key_end: key_word & OFFSET_MASK,
            eor: key_word & FLAG_BIT != 0,
            value_end: value_word & OFFSET_MASK,
            deleted: value_word & FLAG_BIT != 0,
            meta: u64::from_le_bytes(meta),
        }
    }
}

/// A loaded, decompressed page. Read-only.
#[derive(Debug, Clone)]
pub struct Node {
    entries: Vec<Entry>,
    keys: Vec<u8>,
    values: Vec<u8>,
}

impl Node {
    /// Parse and decompress a page produced by [`NodeBuilder::flush`].
    pub fn load(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::Corruption("page too short".into()));
        }
        let count = u16::from_le_bytes([data[0], data[1]]) as usize;
        if count > MAX_KEYS {
            return Err(Error::Corruption(format!("page entry count {count} too large")));
        }

        let mut rest = &data[2..];
        let raw_entries = decompress_block(&mut rest)?;
        let keys = decompress_block(&mut rest)?;
        let values = decompress_block(&mut rest)?;

        if raw_entries.len() != count * ENTRY_SIZE {
            return Err(Error::Corruption(format!(
                "entries block holds {} bytes, expected {}",
                raw_entries.len(),
                count * ENTRY_SIZE
            )));
        }

        let entries: Vec<Entry> = raw_entries.chunks_exact(ENTRY_SIZE).map(Entry::decode).collect();

        let (mut key_end, mut value_end) = (0u16, 0u16);
        for e in &entries {
            if e.key_end < key_end || e.value_end < value_end {
                return Err(Error::Corruption("page offsets not monotonic".into()));
            }
            key_end = e.key_end;
            value_end = e.value_end;
        }
        if key_end as usize > keys.len() || value_end as usize > values.len() {
            return Err(Error::Corruption("page offsets exceed blob size".into()));
        }

        Ok(Node {
            entries,
            keys,
            values,
        })
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_at(&self, ndx: usize) -> &[u8] {
        let start = if ndx == 0 { 0 } else { self.entries[ndx - 1].key_end as usize };
        &self.keys[start..self.entries[ndx].key_end as usize]
    }

    pub fn value_at(&self, ndx: usize) -> &[u8] {
        let start = if ndx == 0 { 0 } else { self.entries[ndx - 1].value_end as usize };
        &self.values[start..self.entries[ndx].value_end as usize]
    }

    pub fn eor_at(&self, ndx: usize) -> bool {
        self.entries[ndx].eor
    }

    pub fn deleted_at(&self, ndx: usize) -> bool {
        self.entries[ndx].deleted
    }

    /// Tid on leaf pages, child location on index pages.
    pub fn meta_at(&self, ndx: usize) -> u64 {
        self.entries[ndx].meta
    }

    /// First index whose key is >= `key`, or `key_count()` if none.
    ///
    /// Binary search narrows the window to at most 8 entries, the rest is
    /// a linear scan.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let mut start = 0;
        let mut end = self.key_count();

        while end - start > 8 {
            let ndx = start + ((end - start) >> 1);
            if key <= self.key_at(ndx) {
                end = ndx;
            } else {
                start = ndx;
            }
        }

        (start..end).find(|&ndx| key <= self.key_at(ndx)).unwrap_or(end)
    }
}

/// Byte-transpose `src` as `stride`-sized elements: all first bytes, then all
/// second bytes, ... Trailing bytes that don't fill an element stay in place.
pub(crate) fn shuffle(src: &[u8], stride: usize) -> Vec<u8> {
    if stride <= 1 || src.len() < stride {
        return src.to_vec();
    }
    let n = src.len() / stride;
    let body = n * stride;
    let mut out = vec![0u8; src.len()];
    for i in 0..n {
        for j in 0..stride {
            out[j * n + i] = src[i * stride + j];
        }
    }
    out[body..].copy_from_slice(&src[body..]);
    out
}

pub(crate) fn unshuffle(src: &[u8], stride: usize) -> Vec<u8> {
    if stride <= 1 || src.len() < stride {
        return src.to_vec();
    }
    let n = src.len() / stride;
    let body = n * stride;
    let mut out = vec![0u8; src.len()];
    for i in 0..n {
        for j in 0..stride {
            out[i * stride + j] = src[j * n + i];
        }
    }
    out[body..].copy_from_slice(&src[body..]);
    out
}

/// Append `[csize][raw_len][stride][payload]` for `raw` to `sink`.
pub(crate) fn compress_block(raw: &[u8], stride: usize, sink: &mut Vec<u8>) -> Result<()> {
    let payload = if raw.is_empty() {
        Vec::new()
    } else {
        lz4_flex::block::compress(&shuffle(raw, stride))
    };

    let frame_size = 4 + payload.len();
    if frame_size > u16::MAX as usize || raw.len() > u16::MAX as usize || stride > u16::MAX as usize
    {
        return Err(Error::InvalidState(format!(
            "page block of {} bytes does not fit its frame",
            raw.len()
        )));
    }

    sink.extend_from_slice(&(frame_size as u16).to_le_bytes());
    sink.extend_from_slice(&(raw.len() as u16).to_le_bytes());
    sink.extend_from_slice(&(stride as u16).to_le_bytes());
    sink.extend_from_slice(&payload);
    Ok(())
}

/// Inverse of [`compress_block`]; advances `source` past the block.
pub(crate) fn decompress_block(source: &mut &[u8]) -> Result<Vec<u8>> {
    let data = *source;
    if data.len() < 2 {
        return Err(Error::Corruption("page block header truncated".into()));
    }
    let frame_size = u16::from_le_bytes([data[0], data[1]]) as usize;
    if frame_size < 4 || data.len() < 2 + frame_size {
        return Err(Error::Corruption("page block truncated".into()));
    }
    let frame = &data[2..2 + frame_size];
    *source = &data[2 + frame_size..];

    let raw_len = u16::from_le_bytes([frame[0], frame[1]]) as usize;
    let stride = u16::from_le_bytes([frame[2], frame[3]]) as usize;

    if raw_len == 0 {
        return Ok(Vec::new());
    }

    let shuffled = lz4_flex::block::decompress(&frame[4..], raw_len)
        .map_err(|e| Error::Corruption(format!("unable to decompress page: {e}")))?;
    if shuffled.len() != raw_len {
        return Err(Error::Corruption(format!(
            "page block decompressed to {} bytes, expected {}",
            shuffled.len(),
            raw_len
        )));
    }

    Ok(unshuffle(&shuffled, stride))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_bits_are_independent() {
        let e = Entry {
            key_end: 0x7FFF,
            eor: false,
            value_end: 0,
            deleted: true,
            meta: u64::MAX - 1,
        };
        let mut buf = Vec::new();
        e.encode_into(&mut buf);
        assert_eq!(buf.len(), ENTRY_SIZE);
        assert_eq!(Entry::decode(&buf), e);

        let e = Entry {
            key_end: 1,
            eor: true,
            value_end: 0x4000,
            deleted: false,
            meta: 7,
        };
        buf.clear();
        e.encode_into(&mut buf);
        assert_eq!(&buf[0..2], &[0x01, 0x80]);
        assert_eq!(Entry::decode(&buf), e);
    }

    #[test]
    fn shuffle_is_reversible() {
        let src: Vec<u8> = (0..103u8).collect();
        for stride in [0, 1, 2, 7, 12, 103, 200] {
            let shuffled = shuffle(&src, stride);
            assert_eq!(unshuffle(&shuffled, stride), src, "stride {stride}");
        }
    }

    #[test]
    fn shuffle_groups_byte_planes() {
        let src = [1u8, 2, 3, 1, 2, 3, 9];
        assert_eq!(shuffle(&src, 3), vec![1, 1, 2, 2, 3, 3, 9]);
    }

    #[test]
    fn block_roundtrip_and_cursor_advance() {
        let a = vec![5u8; 1000];
        let b = b"not uniform at all".to_vec();

        let mut sink = Vec::new();
        compress_block(&a, 4, &mut sink).unwrap();
        compress_block(&[], 0, &mut sink).unwrap();
        compress_block(&b, 0, &mut sink).unwrap();

        let mut cursor = sink.as_slice();
        assert_eq!(decompress_block(&mut cursor).unwrap(), a);
        assert!(decompress_block(&mut cursor).unwrap().is_empty());
        assert_eq!(decompress_block(&mut cursor).unwrap(), b);
        assert!(cursor.is_empty());
    }

    #[test]
    fn damaged_payload_is_corruption() {
        let mut sink = Vec::new();
        compress_block(&vec![1u8; 500], 0, &mut sink).unwrap();
        // Claim a larger raw size than the payload holds.
        sink[2] = 0xFF;
        sink[3] = 0x0F;
        let mut cursor = sink.as_slice();
        assert!(decompress_block(&mut cursor).unwrap_err().is_corruption());
    }
}
