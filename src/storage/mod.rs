//! Durable sample storage.
//!
//! - [`RingLog`]: fixed-capacity circular byte log with a persisted header.
//! - [`CircularSampleLog`]: thread-safe, record-aligned wrapper storing
//!   [`crate::sample::Sample`]s.
//! - [`ByteStore`]: the storage seam, with file and in-memory backends.

pub mod ring_log;
pub mod sample_log;
pub mod store;

pub use ring_log::{RingLog, HEADER_LEN};
pub use sample_log::CircularSampleLog;
pub use store::{ByteStore, FileStore, MemoryStore};
