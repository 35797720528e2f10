use bytes::Bytes;

use crate::error::Result;
use crate::io::{Reader, Writer};

/// Writer that keeps the slice in memory. Unlink just drops the bytes.
#[derive(Default)]
pub struct MemoryWriter {
    buf: Vec<u8>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl Writer for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn unlink(&mut self) -> Result<()> {
        self.buf.clear();
        Ok(())
    }
}

/// Reader over an in-memory slice image.
pub struct MemoryReader {
    data: Bytes,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemoryReader { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<MemoryWriter> for MemoryReader {
    fn from(writer: MemoryWriter) -> Self {
        MemoryReader::new(writer.into_bytes())
    }
}

impl Reader for MemoryReader {
    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn unlink(&self) -> Result<()> {
        Ok(())
    }
}
