//! Byte storage backends for the ring log.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Random-access byte storage.
///
/// [`super::RingLog`] only talks to this trait, so a log can live in a file or
/// in memory.
pub trait ByteStore: Send {
    /// Fill `buf` from `offset`. Reading past the end is an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`, extending the store if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Truncate or zero-extend to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Push buffered writes to durable storage.
    fn sync(&mut self) -> io::Result<()>;
}

/// A ring log file on disk.
#[derive(Debug)]
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Create a new file, failing if `path` already exists.
    pub fn create_new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl ByteStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    bytes: Vec<u8>,
    writes_left: Option<usize>,
}

/// In-memory store. Clones share the same bytes, so a log can be "reopened"
/// from a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `writes` more successful `write_at` calls, then fail every write.
    /// Simulates power loss part way through an update.
    pub fn fail_writes_after(&self, writes: usize) {
        self.lock().writes_left = Some(writes);
    }

    /// Copy of the raw contents.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let inner = self.lock();
        let start = offset as usize;
        let end = start + buf.len();
        let src = inner
            .bytes
            .get(start..end)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if let Some(left) = inner.writes_left.as_mut() {
            if *left == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"));
            }
            *left -= 1;
        }
        let start = offset as usize;
        let end = start + buf.len();
        if inner.bytes.len() < end {
            inner.bytes.resize(end, 0);
        }
        inner.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.lock().bytes.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.lock().bytes.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
