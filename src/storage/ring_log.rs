//! Disk-backed circular byte log.
//!
//! # File layout
//! ```text
//! [12-byte header] [capacity_bytes data region]
//!
//! Header (little-endian):
//!   capacity_bytes: u32   size of the data region
//!   read_offset:    u32   oldest unread byte, 0 <= read_offset < capacity_bytes
//!   used_bytes:     u32   unread bytes, 0 <= used_bytes <= capacity_bytes
//! ```
//!
//! The write position is `(read_offset + used_bytes) % capacity_bytes`.
//! Writing into a full log silently evicts the oldest bytes.
//!
//! Every mutation writes the data region first and the header last. A crash
//! between the two leaves the header describing the state before the write:
//! the in-flight write is lost, earlier data is not. The one exception is a
//! resize that must move bytes over live data, which commits an empty header
//! first (see [`RingLog::set_capacity`]).

use std::path::Path;

use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use super::store::{ByteStore, FileStore};
use crate::error::RingLogError;

/// Size of the persisted header.
pub const HEADER_LEN: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    capacity_bytes: u32,
    read_offset: u32,
    used_bytes: u32,
}

impl Header {
    fn new(capacity_bytes: u32) -> Self {
        Self {
            capacity_bytes,
            read_offset: 0,
            used_bytes: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.capacity_bytes);
        buf.put_u32_le(self.read_offset);
        buf.put_u32_le(self.used_bytes);
        out
    }

    fn decode(mut bytes: &[u8]) -> Self {
        Self {
            capacity_bytes: bytes.get_u32_le(),
            read_offset: bytes.get_u32_le(),
            used_bytes: bytes.get_u32_le(),
        }
    }

    fn write_offset(&self) -> u32 {
        ((u64::from(self.read_offset) + u64::from(self.used_bytes))
            % u64::from(self.capacity_bytes)) as u32
    }
}

/// Fixed-capacity FIFO byte log over a [`ByteStore`].
///
/// Not internally synchronised: wrap it in a mutex to share it (see
/// [`super::CircularSampleLog`]).
#[derive(Debug)]
pub struct RingLog<S: ByteStore = FileStore> {
    store: S,
    header: Header,
    sync_writes: bool,
}

impl RingLog<FileStore> {
    /// Create a new log file. Fails if `path` already exists.
    pub fn create(path: &Path, capacity_bytes: u32) -> Result<Self, RingLogError> {
        if capacity_bytes == 0 {
            return Err(RingLogError::InvalidCapacity(0));
        }
        let store = FileStore::create_new(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                RingLogError::AlreadyExists(path.display().to_string())
            }
            _ => RingLogError::Io(e),
        })?;
        debug!(path = %path.display(), capacity_bytes, "Creating ring log");
        Self::create_in(store, capacity_bytes)
    }

    /// Open an existing log file.
    pub fn open(path: &Path) -> Result<Self, RingLogError> {
        let store = FileStore::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RingLogError::NotFound(path.display().to_string()),
            _ => RingLogError::Io(e),
        })?;
        let log = Self::open_in(store)?;
        debug!(
            path = %path.display(),
            capacity_bytes = log.capacity_bytes(),
            used_bytes = log.used_bytes(),
            "Opened ring log"
        );
        Ok(log)
    }
}

impl<S: ByteStore> RingLog<S> {
    /// Initialise an empty log in `store`.
    pub fn create_in(mut store: S, capacity_bytes: u32) -> Result<Self, RingLogError> {
        if capacity_bytes == 0 {
            return Err(RingLogError::InvalidCapacity(0));
        }
        store.set_len(HEADER_LEN + u64::from(capacity_bytes))?;
        let header = Header::new(capacity_bytes);
        let mut log = Self {
            store,
            header,
            sync_writes: false,
        };
        log.commit(header)?;
        Ok(log)
    }

    /// Load a log previously written to `store`.
    pub fn open_in(mut store: S) -> Result<Self, RingLogError> {
        let len = store.len()?;
        if len < HEADER_LEN {
            return Err(RingLogError::Truncated(format!(
                "file is {len} bytes, header needs {HEADER_LEN}"
            )));
        }
        let mut raw = [0u8; HEADER_LEN as usize];
        store.read_at(0, &mut raw)?;
        let header = Header::decode(&raw);

        if header.capacity_bytes == 0 {
            return Err(RingLogError::InvalidCapacity(0));
        }
        if header.used_bytes > header.capacity_bytes
            || (header.used_bytes > 0 && header.read_offset >= header.capacity_bytes)
        {
            return Err(RingLogError::Truncated(format!(
                "inconsistent header {header:?}"
            )));
        }
        if len < HEADER_LEN + u64::from(header.capacity_bytes) {
            return Err(RingLogError::Truncated(format!(
                "file is {len} bytes, capacity needs {}",
                HEADER_LEN + u64::from(header.capacity_bytes)
            )));
        }

        let mut header = header;
        if header.used_bytes == 0 {
            header.read_offset = 0;
        }

        Ok(Self {
            store,
            header,
            sync_writes: false,
        })
    }

    /// Flush to durable storage after the data write and after the header write.
    pub fn set_sync_writes(&mut self, enabled: bool) {
        self.sync_writes = enabled;
    }

    /// Size of the data region.
    pub fn capacity_bytes(&self) -> u32 {
        self.header.capacity_bytes
    }

    /// Unread bytes.
    pub fn used_bytes(&self) -> u32 {
        self.header.used_bytes
    }

    /// Bytes that can be written without evicting.
    pub fn free_bytes(&self) -> u32 {
        self.header.capacity_bytes - self.header.used_bytes
    }

    /// Data offset of the oldest unread byte.
    pub fn read_offset(&self) -> u32 {
        self.header.read_offset
    }

    /// Data offset of the next write.
    pub fn write_offset(&self) -> u32 {
        self.header.write_offset()
    }

    /// Whether there are no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.header.used_bytes == 0
    }

    /// Append `buf`, evicting the oldest bytes if there is not enough room.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), RingLogError> {
        let capacity = self.header.capacity_bytes;
        if buf.len() > capacity as usize {
            return Err(RingLogError::Overflow {
                len: buf.len(),
                capacity,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }

        let write_offset = self.header.write_offset();
        self.write_region(write_offset, buf)?;
        self.sync_if_enabled()?;

        let len = buf.len() as u32;
        let free = self.free_bytes();
        let mut next = self.header;
        if len > free {
            let evicted = len - free;
            trace!(evicted, "Ring log full, evicting oldest bytes");
            next.read_offset = self.advance(next.read_offset, evicted);
            next.used_bytes = capacity;
        } else {
            next.used_bytes += len;
        }

        self.commit(next)
    }

    /// Consume exactly `buf.len()` of the oldest bytes into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), RingLogError> {
        self.check_available(buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        self.read_region(self.header.read_offset, buf)?;
        self.consume(buf.len() as u32)
    }

    /// Consume `len` of the oldest bytes into a new buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, RingLogError> {
        let mut buf = vec![0u8; len];
        self.read(&mut buf)?;
        Ok(buf)
    }

    /// Discard `len` of the oldest bytes without reading them.
    pub fn skip(&mut self, len: usize) -> Result<(), RingLogError> {
        self.check_available(len)?;
        if len == 0 {
            return Ok(());
        }
        self.consume(len as u32)
    }

    /// Copy of every unread byte, oldest first. Does not consume anything.
    pub fn snapshot(&mut self) -> Result<Vec<u8>, RingLogError> {
        self.snapshot_range(0, self.header.used_bytes as usize)
    }

    /// Copy `len` unread bytes starting `skip` bytes after the oldest one.
    pub fn snapshot_range(&mut self, skip: usize, len: usize) -> Result<Vec<u8>, RingLogError> {
        let used = self.header.used_bytes as usize;
        if skip + len > used {
            return Err(RingLogError::Underflow {
                requested: skip + len,
                available: self.header.used_bytes,
            });
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            let start = self.advance(self.header.read_offset, skip as u32);
            self.read_region(start, &mut buf)?;
        }
        Ok(buf)
    }

    /// Change the data region size.
    ///
    /// When the unread bytes sit contiguously below both the old and the new
    /// capacity only the header changes. When growing a wrapped log, one of
    /// the two wrapped segments is copied into the newly added space and the
    /// header is committed afterwards, so a crash keeps the old layout.
    /// Otherwise the log is first committed as empty, then the unread bytes
    /// (trimmed from the oldest end if they no longer fit) are rewritten from
    /// offset 0. A crash there loses the contents but never mixes them.
    pub fn set_capacity(&mut self, new_capacity: u32) -> Result<(), RingLogError> {
        if new_capacity == 0 {
            return Err(RingLogError::InvalidCapacity(0));
        }
        let old_capacity = self.header.capacity_bytes;
        if new_capacity == old_capacity {
            return Ok(());
        }

        let end = u64::from(self.header.read_offset) + u64::from(self.header.used_bytes);
        if end <= u64::from(old_capacity) && end <= u64::from(new_capacity) {
            debug!(old_capacity, new_capacity, "Resizing ring log in place");
            if new_capacity > old_capacity {
                self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
            }
            let mut next = self.header;
            next.capacity_bytes = new_capacity;
            if next.used_bytes == 0 {
                next.read_offset = 0;
            }
            self.commit(next)?;
            if new_capacity < old_capacity {
                self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
            }
            return Ok(());
        }

        if new_capacity > old_capacity && self.grow_wrapped(new_capacity)? {
            return Ok(());
        }
        self.relocate(new_capacity)
    }

    /// Unwrap a wrapped log into the space added by growing it. Returns
    /// `false` when neither segment fits in the added space.
    fn grow_wrapped(&mut self, new_capacity: u32) -> Result<bool, RingLogError> {
        let old_capacity = self.header.capacity_bytes;
        let added = new_capacity - old_capacity;
        let read_offset = self.header.read_offset;
        let tail_len = old_capacity - read_offset;
        let head_len = self.header.used_bytes - tail_len;

        let mut next = self.header;
        next.capacity_bytes = new_capacity;
        if head_len <= added {
            // [read_offset, old) stays; [0, head) moves to [old, old + head).
            let mut head = vec![0u8; head_len as usize];
            self.store.read_at(HEADER_LEN, &mut head)?;
            self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
            self.store.write_at(HEADER_LEN + u64::from(old_capacity), &head)?;
        } else if tail_len <= added {
            // [0, head) stays; the tail moves to the end of the new region.
            let mut tail = vec![0u8; tail_len as usize];
            self.store.read_at(HEADER_LEN + u64::from(read_offset), &mut tail)?;
            self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
            next.read_offset = new_capacity - tail_len;
            self.store.write_at(HEADER_LEN + u64::from(next.read_offset), &tail)?;
        } else {
            return Ok(false);
        }
        debug!(
            old_capacity,
            new_capacity,
            read_offset = next.read_offset,
            "Growing wrapped ring log"
        );
        self.sync_if_enabled()?;
        self.commit(next)?;
        Ok(true)
    }

    fn relocate(&mut self, new_capacity: u32) -> Result<(), RingLogError> {
        let old_capacity = self.header.capacity_bytes;
        let mut data = self.snapshot()?;
        if data.len() > new_capacity as usize {
            let dropped = data.len() - new_capacity as usize;
            debug!(dropped, "Shrinking ring log below its contents");
            data.drain(..dropped);
        }
        debug!(
            old_capacity,
            new_capacity,
            relocated = data.len(),
            "Resizing ring log by relocation"
        );

        // The rewrite below overlaps live bytes.
        self.commit(Header::new(old_capacity))?;
        if new_capacity > old_capacity {
            self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
        }
        if !data.is_empty() {
            self.store.write_at(HEADER_LEN, &data)?;
            self.sync_if_enabled()?;
        }
        let mut next = Header::new(new_capacity);
        next.used_bytes = data.len() as u32;
        self.commit(next)?;
        if new_capacity < old_capacity {
            self.store.set_len(HEADER_LEN + u64::from(new_capacity))?;
        }
        Ok(())
    }

    /// Flush and release the underlying store.
    pub fn close(mut self) -> Result<(), RingLogError> {
        self.store.sync()?;
        Ok(())
    }

    /// Give back the store, e.g. to reopen an in-memory log.
    pub fn into_store(self) -> S {
        self.store
    }

    fn check_available(&self, len: usize) -> Result<(), RingLogError> {
        if len > self.header.used_bytes as usize {
            return Err(RingLogError::Underflow {
                requested: len,
                available: self.header.used_bytes,
            });
        }
        Ok(())
    }

    fn consume(&mut self, len: u32) -> Result<(), RingLogError> {
        let mut next = self.header;
        next.read_offset = self.advance(next.read_offset, len);
        next.used_bytes -= len;
        self.commit(next)
    }

    fn advance(&self, offset: u32, by: u32) -> u32 {
        ((u64::from(offset) + u64::from(by)) % u64::from(self.header.capacity_bytes)) as u32
    }

    /// Write `buf` at data offset `start`, wrapping at the end of the region.
    fn write_region(&mut self, start: u32, buf: &[u8]) -> Result<(), RingLogError> {
        let tail_room = (self.header.capacity_bytes - start) as usize;
        let (tail, head) = buf.split_at(buf.len().min(tail_room));
        self.store.write_at(HEADER_LEN + u64::from(start), tail)?;
        if !head.is_empty() {
            self.store.write_at(HEADER_LEN, head)?;
        }
        Ok(())
    }

    /// Fill `buf` from data offset `start`, wrapping at the end of the region.
    fn read_region(&mut self, start: u32, buf: &mut [u8]) -> Result<(), RingLogError> {
        let tail_room = (self.header.capacity_bytes - start) as usize;
        let split = buf.len().min(tail_room);
        let (tail, head) = buf.split_at_mut(split);
        self.store.read_at(HEADER_LEN + u64::from(start), tail)?;
        if !head.is_empty() {
            self.store.read_at(HEADER_LEN, head)?;
        }
        Ok(())
    }

    /// Persist `next` and adopt it only once the header write succeeded.
    fn commit(&mut self, next: Header) -> Result<(), RingLogError> {
        self.store.write_at(0, &next.encode())?;
        self.sync_if_enabled()?;
        self.header = next;
        Ok(())
    }

    fn sync_if_enabled(&mut self) -> Result<(), RingLogError> {
        if self.sync_writes {
            self.store.sync()?;
        }
        Ok(())
    }
}
