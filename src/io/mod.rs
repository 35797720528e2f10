//! Byte-level collaborators consumed by the slice layer.
//!
//! The slice code never touches file descriptors. It writes through a
//! sequential [`Writer`] and reads through a positional [`Reader`], so the
//! same format code runs against files and in-memory buffers.

pub mod file;
pub mod memory;

pub use file::{FileReader, FileWriter};
pub use memory::{MemoryReader, MemoryWriter};

use crate::error::Result;

/// Sequential byte sink a slice is written into.
pub trait Writer: Send {
    /// Append `data`. Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Bytes written so far; the offset the next write lands at.
    fn offset(&self) -> u64;

    /// Push buffered bytes down to durable storage.
    fn flush(&mut self) -> Result<()>;

    /// Remove whatever has been written. Used for abandoned slices.
    fn unlink(&mut self) -> Result<()>;
}

/// Random-access byte source a finished slice is read from.
///
/// Shared between threads: a slice is read concurrently by every iterator
/// opened on it.
pub trait Reader: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`. Returns the number of
    /// bytes read, which is less than requested only at end of data.
    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Remove the underlying storage.
    fn unlink(&self) -> Result<()>;
}
