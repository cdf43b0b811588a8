//! # Fishfinder Core Library
//!
//! Talks to a battery-powered sonar "fish-finder" over an unreliable wireless
//! link, decodes its binary packets, keeps only the samples that changed
//! materially, and stores them in a fixed-capacity disk-backed circular log.
//! The binary (`main.rs`) is a thin CLI over this library.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: the 18-byte sample frame decoder, the 12-byte
//!   configuration command and a stream resynchronizer for serial links.
//! - **`sample`**: the durable [`Sample`] record and its 29-byte encoding.
//! - **`filter`**: the significant-change predicate deciding which samples to keep.
//! - **`storage`**: the [`RingLog`] byte log and the thread-safe
//!   [`CircularSampleLog`] on top of it.
//! - **`queue`**: the [`OperationQueue`] that serializes device I/O with
//!   per-operation timeouts.
//! - **`transport`**: the [`Transport`] trait and its mock, simulated and
//!   serial backends.
//! - **`controller`**: the [`ConnectionController`] state machine with
//!   watchdog-driven reconnect.
//! - **`export`**: track exporters over log snapshots.
//! - **`config`** / **`telemetry`**: Figment configuration and tracing setup.
//! - **`error`**: per-layer error enums and the [`FishfinderError`] umbrella.

pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod filter;
pub mod protocol;
pub mod queue;
pub mod sample;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use controller::{ConnectionController, ConnectionState, ControllerHandle, DeviceSettings};
pub use error::{AppResult, FishfinderError};
pub use queue::OperationQueue;
pub use sample::{Location, Sample, SAMPLE_BYTES};
pub use storage::{CircularSampleLog, RingLog};
pub use transport::Transport;
