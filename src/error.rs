//! Custom error types for the sonar link and sample log.
//!
//! Each layer has its own `thiserror` enum so that callers can match on the
//! failures that matter to them:
//!
//! - **`FrameError`**: a notification could not be decoded. Always recovered
//!   locally by dropping the packet; never surfaced as a connection fault.
//! - **`RingLogError`**: durable log failures. `Overflow` means a single write
//!   exceeds total capacity (a configuration bug); `Underflow` means the caller
//!   asked for more bytes than are stored (a programming error).
//! - **`TransportError`**: failures reported by a transport backend.
//! - **`OperationError`**: outcome of a queued device operation. A timeout is
//!   treated exactly like an explicit failure.
//! - **`QueueError`** and **`ControllerError`**: the serializer or the
//!   controller actor is no longer accepting work, or a request was invalid in
//!   the current state.
//!
//! `FishfinderError` consolidates all of them with `#[from]` so that the CLI
//! can use `?` everywhere.

use thiserror::Error;

use crate::controller::ConnectionState;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, FishfinderError>;

/// Rejection reasons for an inbound sample frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad frame length: expected 18 bytes, got {len}")]
    BadLength { len: usize },

    #[error("bad frame signature: {found:02X?}")]
    BadSignature { found: [u8; 2] },

    #[error("bad frame checksum: expected 0x{expected:02X}, found 0x{found:02X}")]
    BadChecksum { expected: u8, found: u8 },
}

/// Errors raised by the disk-backed circular log.
#[derive(Error, Debug)]
pub enum RingLogError {
    #[error("ring log already exists: {0}")]
    AlreadyExists(String),

    #[error("ring log not found: {0}")]
    NotFound(String),

    #[error("ring log is truncated or corrupt: {0}")]
    Truncated(String),

    #[error("invalid ring log capacity: {0}")]
    InvalidCapacity(u64),

    #[error("write of {len} bytes exceeds ring log capacity of {capacity} bytes")]
    Overflow { len: usize, capacity: u32 },

    #[error("read of {requested} bytes exceeds the {available} bytes stored")]
    Underflow { requested: usize, available: u32 },

    #[error("ring log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a transport backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        TransportError::Io(value.to_string())
    }
}

/// Failure of a single queued device operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("operation failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The operation queue's worker has stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("operation queue is closed")]
    Closed,
}

/// Errors returned by the connection controller handle.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: ConnectionState,
    },

    #[error("connection controller has stopped")]
    Stopped,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors produced while exporting samples.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("export format '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("unknown export format '{0}'")]
    UnknownFormat(String),
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum FishfinderError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Tracing initialization error: {0}")]
    Telemetry(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Ring log error: {0}")]
    RingLog(#[from] RingLogError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for FishfinderError {
    fn from(value: figment::Error) -> Self {
        FishfinderError::Config(Box::new(value))
    }
}
