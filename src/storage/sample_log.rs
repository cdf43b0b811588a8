//! Sample-typed view over a [`RingLog`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::ring_log::RingLog;
use super::store::{ByteStore, FileStore};
use crate::error::RingLogError;
use crate::sample::{Sample, SAMPLE_BYTES};

/// Circular log of [`Sample`] records.
///
/// Capacity is always a whole number of records, so eviction in the
/// underlying byte log drops whole samples. All methods take `&self` and
/// serialise through a mutex, so the log can be shared between the
/// connection controller and an exporter.
#[derive(Debug)]
pub struct CircularSampleLog<S: ByteStore = FileStore> {
    inner: Mutex<RingLog<S>>,
}

impl CircularSampleLog<FileStore> {
    /// Create a log file sized for `capacity_samples` records.
    pub fn create(path: &Path, capacity_samples: u32) -> Result<Self, RingLogError> {
        let log = RingLog::create(path, capacity_bytes_for(capacity_samples)?)?;
        info!(path = %path.display(), capacity_samples, "Created sample log");
        Ok(Self::wrap(log))
    }

    /// Open an existing log file.
    pub fn open(path: &Path) -> Result<Self, RingLogError> {
        Self::from_ring_log(RingLog::open(path)?)
    }

    /// Open `path` if it exists, otherwise create it with `capacity_samples`.
    ///
    /// An existing log keeps its own capacity; call
    /// [`set_capacity_samples`](Self::set_capacity_samples) to change it.
    pub fn open_or_create(path: &Path, capacity_samples: u32) -> Result<Self, RingLogError> {
        match Self::open(path) {
            Err(RingLogError::NotFound(_)) => Self::create(path, capacity_samples),
            other => other,
        }
    }
}

impl<S: ByteStore> CircularSampleLog<S> {
    /// Create a log in an arbitrary store.
    pub fn create_in(store: S, capacity_samples: u32) -> Result<Self, RingLogError> {
        let log = RingLog::create_in(store, capacity_bytes_for(capacity_samples)?)?;
        Ok(Self::wrap(log))
    }

    /// Wrap an already opened byte log, checking it holds whole records.
    pub fn from_ring_log(log: RingLog<S>) -> Result<Self, RingLogError> {
        let record = SAMPLE_BYTES as u32;
        if log.capacity_bytes() % record != 0 || log.used_bytes() % record != 0 {
            return Err(RingLogError::Truncated(format!(
                "capacity {} / used {} bytes is not a multiple of the {SAMPLE_BYTES}-byte record",
                log.capacity_bytes(),
                log.used_bytes()
            )));
        }
        Ok(Self::wrap(log))
    }

    fn wrap(log: RingLog<S>) -> Self {
        Self {
            inner: Mutex::new(log),
        }
    }

    /// Persist a sample, evicting the oldest when full.
    pub fn append(&self, sample: &Sample) -> Result<(), RingLogError> {
        self.lock().write(&sample.encode())
    }

    /// Drop the oldest `n` samples, or all of them if fewer are stored.
    /// Returns how many were removed.
    pub fn remove_oldest(&self, n: usize) -> Result<usize, RingLogError> {
        let mut log = self.lock();
        let stored = log.used_bytes() as usize / SAMPLE_BYTES;
        let removed = n.min(stored);
        log.skip(removed * SAMPLE_BYTES)?;
        debug!(removed, "Removed oldest samples");
        Ok(removed)
    }

    /// The newest `n` samples (fewer if fewer are stored), oldest first.
    /// The log is not modified.
    pub fn snapshot_samples(&self, n: usize) -> Result<Vec<Sample>, RingLogError> {
        let mut log = self.lock();
        let stored = log.used_bytes() as usize / SAMPLE_BYTES;
        let take = n.min(stored);
        let skip = (stored - take) * SAMPLE_BYTES;
        let bytes = log.snapshot_range(skip, take * SAMPLE_BYTES)?;
        drop(log);

        bytes.chunks_exact(SAMPLE_BYTES).map(Sample::decode).collect()
    }

    /// Every stored sample, oldest first.
    pub fn snapshot_all(&self) -> Result<Vec<Sample>, RingLogError> {
        self.snapshot_samples(usize::MAX)
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.lock().used_bytes() as usize / SAMPLE_BYTES
    }

    /// Whether the log holds no samples.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Samples held before the oldest is overwritten.
    pub fn capacity_samples(&self) -> usize {
        self.lock().capacity_bytes() as usize / SAMPLE_BYTES
    }

    /// Resize to hold `capacity_samples`, keeping the newest records.
    pub fn set_capacity_samples(&self, capacity_samples: u32) -> Result<(), RingLogError> {
        let capacity_bytes = capacity_bytes_for(capacity_samples)?;
        self.lock().set_capacity(capacity_bytes)?;
        info!(capacity_samples, "Resized sample log");
        Ok(())
    }

    /// Enable data/header fsync on every append.
    pub fn set_sync_writes(&self, enabled: bool) {
        self.lock().set_sync_writes(enabled);
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), RingLogError> {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .close()
    }

    fn lock(&self) -> MutexGuard<'_, RingLog<S>> {
        // A panic while holding the lock cannot leave the header torn: the
        // in-memory header is only replaced after a successful write.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn capacity_bytes_for(capacity_samples: u32) -> Result<u32, RingLogError> {
    if capacity_samples == 0 {
        return Err(RingLogError::InvalidCapacity(0));
    }
    capacity_samples
        .checked_mul(SAMPLE_BYTES as u32)
        .ok_or(RingLogError::InvalidCapacity(u64::from(capacity_samples)))
}
