use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::{Reader, Writer};

/// Buffered, append-only slice file.
///
/// Two layers of buffering, as for any file:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
/// `flush()` does both, so a flushed slice is durable.
pub struct FileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    offset: u64,
}

impl FileWriter {
    /// Create a new file at `path`. Fails if it already exists.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(FileWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            offset: 0,
        })
    }

    /// Create a randomly named `<hex>.dat` file inside `dir`.
    pub fn create_in(dir: &Path) -> Result<Self> {
        let name = format!("{:016x}.dat", rand::random::<u64>());
        Self::create(&dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Writer for FileWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(data.len())
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn unlink(&mut self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Read-only handle on a finished slice file, using positional reads so
/// any number of iterators can share it.
pub struct FileReader {
    file: File,
    path: PathBuf,
}

impl FileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(FileReader {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Current file length, i.e. the size a committed slice was written with.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reader for FileReader {
    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    fn unlink(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}
