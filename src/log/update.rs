//! Serialized form of a write transaction.
//!
//! A transaction is a list of update blocks. Each block is a run of entries:
//! ```text
//! ┌──────────────┬───────────┬─────────────┬───────────────┬─────┬───────┐
//! │ ushard (2B)  │ flags (1B)│ key_len (2B)│ value_len (4B)│ key │ value │
//! └──────────────┴───────────┴─────────────┴───────────────┴─────┴───────┘
//! flags: bit 0 = eor, bit 1 = deleted
//! ```
//! Blocks are what the log consumes and what watchers receive, so a
//! replica can replay them verbatim.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::log::options::DEFAULT_BLOCK_SIZE;
use crate::slice::MAX_KEY_SIZE;

const FLAG_EOR: u8 = 0x01;
const FLAG_DELETED: u8 = 0x02;
const ENTRY_HEADER_SIZE: usize = 2 + 1 + 2 + 4;

/// One decoded update entry, borrowing from its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEntry<'a> {
    pub ushard: u16,
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub eor: bool,
    pub deleted: bool,
}

/// A batch of updates, committed atomically by
/// [`Log::update`](crate::log::Log::update).
///
/// Entries routed to the same ushard MUST be added in key order; entries
/// of different ushards may interleave.
///
/// An entry whose key or value can't be encoded is not added; the
/// transaction remembers the first such entry and fails as a whole in
/// [`into_blocks`](Transaction::into_blocks).
#[derive(Debug, Clone)]
pub struct Transaction {
    blocks: Vec<Bytes>,
    current: BytesMut,
    block_size: usize,
    rejected: Option<String>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Transaction {
            blocks: Vec::new(),
            current: BytesMut::new(),
            block_size,
            rejected: None,
        }
    }

    /// Rebuild a transaction from blocks received by a watcher.
    pub fn from_blocks(blocks: Vec<Bytes>) -> Result<Self> {
        for block in &blocks {
            for entry in entries(block) {
                entry?;
            }
        }
        Ok(Transaction {
            blocks,
            current: BytesMut::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            rejected: None,
        })
    }

    /// Store a complete record.
    pub fn put(&mut self, ushard: u16, key: &[u8], value: &[u8]) -> &mut Self {
        self.push(ushard, key, value, FLAG_EOR)
    }

    /// Store a tombstone.
    pub fn delete(&mut self, ushard: u16, key: &[u8]) -> &mut Self {
        self.push(ushard, key, &[], FLAG_EOR | FLAG_DELETED)
    }

    /// Store one fragment of a record. The last fragment has `eor` set.
    pub fn append(&mut self, ushard: u16, key: &[u8], value: &[u8], eor: bool) -> &mut Self {
        self.push(ushard, key, value, if eor { FLAG_EOR } else { 0 })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.current.is_empty()
    }

    /// Seal the open block and return every block. Fails with
    /// [`Error::InvalidData`] if any entry was rejected.
    pub fn into_blocks(mut self) -> Result<Vec<Bytes>> {
        if let Some(reason) = self.rejected.take() {
            return Err(Error::InvalidData(reason));
        }
        self.seal();
        Ok(self.blocks)
    }

    /// Decode every entry, block by block.
    pub fn entries(&self) -> impl Iterator<Item = Result<UpdateEntry<'_>>> {
        self.blocks
            .iter()
            .map(|b| &b[..])
            .chain(std::iter::once(&self.current[..]))
            .flat_map(entries)
    }

    fn push(&mut self, ushard: u16, key: &[u8], value: &[u8], flags: u8) -> &mut Self {
        if self.rejected.is_some() {
            return self;
        }
        if key.len() >= MAX_KEY_SIZE {
            self.rejected = Some(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                MAX_KEY_SIZE - 1
            ));
            return self;
        }
        let Ok(value_len) = u32::try_from(value.len()) else {
            self.rejected = Some(format!("value of {} bytes is too large", value.len()));
            return self;
        };

        let size = ENTRY_HEADER_SIZE + key.len() + value.len();
        if !self.current.is_empty() && self.current.len() + size > self.block_size {
            self.seal();
        }

        self.current.reserve(size);
        self.current.put_u16_le(ushard);
        self.current.put_u8(flags);
        // Fits: checked against MAX_KEY_SIZE above.
        self.current.put_u16_le(key.len() as u16);
        self.current.put_u32_le(value_len);
        self.current.put_slice(key);
        self.current.put_slice(value);
        self
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            self.blocks.push(self.current.split().freeze());
        }
    }
}

/// Iterate the entries of one update block.
pub fn entries(block: &[u8]) -> BlockEntries<'_> {
    BlockEntries { buf: block }
}

pub struct BlockEntries<'a> {
    buf: &'a [u8],
}

impl<'a> BlockEntries<'a> {
    fn decode(&mut self) -> Result<UpdateEntry<'a>> {
        if self.buf.remaining() < ENTRY_HEADER_SIZE {
            return Err(Error::InvalidData("truncated update entry header".into()));
        }
        let ushard = self.buf.get_u16_le();
        let flags = self.buf.get_u8();
        let key_len = self.buf.get_u16_le() as usize;
        let value_len = self.buf.get_u32_le() as usize;

        if flags & !(FLAG_EOR | FLAG_DELETED) != 0 {
            return Err(Error::InvalidData(format!("unknown update flags {flags:#04x}")));
        }
        if key_len >= MAX_KEY_SIZE {
            return Err(Error::InvalidData(format!("update key of {key_len} bytes")));
        }
        if self.buf.remaining() < key_len + value_len {
            return Err(Error::InvalidData("truncated update entry".into()));
        }

        let (key, rest) = self.buf.split_at(key_len);
        let (value, rest) = rest.split_at(value_len);
        self.buf = rest;

        Ok(UpdateEntry {
            ushard,
            key,
            value,
            eor: flags & FLAG_EOR != 0,
            deleted: flags & FLAG_DELETED != 0,
        })
    }
}

impl<'a> Iterator for BlockEntries<'a> {
    type Item = Result<UpdateEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let entry = self.decode();
        if entry.is_err() {
            self.buf = &[];
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_order_and_flags() {
        let mut txn = Transaction::new();
        txn.put(3, b"a", b"1")
            .delete(3, b"b")
            .append(1, b"c", b"xx", false)
            .append(1, b"c", b"yy", true);

        let got: Vec<_> = txn.entries().collect::<Result<_>>().unwrap();
        assert_eq!(got.len(), 4);
        assert_eq!((got[0].ushard, got[0].key, got[0].value), (3, &b"a"[..], &b"1"[..]));
        assert!(got[0].eor && !got[0].deleted);
        assert!(got[1].eor && got[1].deleted && got[1].value.is_empty());
        assert!(!got[2].eor);
        assert!(got[3].eor);
    }

    #[test]
    fn blocks_split_at_budget() {
        let mut txn = Transaction::with_block_size(64);
        for i in 0..10u8 {
            txn.put(0, &[b'k', i], &[0u8; 20]);
        }
        let count = txn.entries().count();
        let blocks = txn.into_blocks().unwrap();
        assert!(blocks.len() > 1);
        assert!(blocks.iter().all(|b| b.len() <= 64));

        let replay = Transaction::from_blocks(blocks).unwrap();
        assert_eq!(replay.entries().count(), count);
    }

    #[test]
    fn oversized_entry_gets_its_own_block() {
        let mut txn = Transaction::with_block_size(16);
        txn.put(0, b"a", b"1");
        txn.put(0, b"b", &[7u8; 100]);
        let blocks = txn.into_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].len(), ENTRY_HEADER_SIZE + 1 + 100);
    }

    #[test]
    fn truncated_block_is_invalid_data() {
        let mut txn = Transaction::new();
        txn.put(0, b"key", b"value");
        let block = txn.into_blocks().unwrap().remove(0);

        let cut = block.slice(..block.len() - 1);
        let err = Transaction::from_blocks(vec![cut]).unwrap_err();
        assert!(err.is_invalid_data());

        let cut = block.slice(..4);
        let mut it = entries(&cut);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn oversized_key_fails_the_transaction() {
        // The tail of the key looks like a second, well-formed entry.
        let mut inner = Transaction::new();
        inner.put(0, b"k2", &[0u8; 16]);
        let mut key = b"k1".to_vec();
        key.extend_from_slice(&inner.into_blocks().unwrap()[0]);
        key.resize(u16::MAX as usize + 3, 0);

        let mut txn = Transaction::new();
        txn.put(0, b"a", b"1").put(0, &key, b"").put(0, b"z", b"2");
        assert_eq!(txn.entries().count(), 1);
        assert!(txn.into_blocks().unwrap_err().is_invalid_data());

        let mut txn = Transaction::new();
        txn.delete(0, &[b'k'; MAX_KEY_SIZE]);
        assert!(txn.into_blocks().unwrap_err().is_invalid_data());

        let mut txn = Transaction::new();
        txn.put(0, &[b'k'; MAX_KEY_SIZE - 1], b"v");
        assert_eq!(txn.into_blocks().unwrap().len(), 1);
    }

    #[test]
    fn unknown_flags_rejected() {
        let mut txn = Transaction::new();
        txn.put(0, b"k", b"v");
        let mut raw = txn.into_blocks().unwrap().remove(0).to_vec();
        raw[2] = 0x80;
        assert!(Transaction::from_blocks(vec![Bytes::from(raw)]).is_err());
    }
}
