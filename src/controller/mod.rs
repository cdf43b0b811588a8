//! Connection state machine for one sonar sensor.
//!
//! The controller is a single tokio task (an actor). Caller commands arrive on
//! an mpsc channel, transport callbacks on the [`EventSink`] channel and
//! watchdog ticks from a timer, and one `select!` loop handles them in order,
//! so no transition is ever observed half-applied. All device I/O is pushed
//! through an [`OperationQueue`](crate::queue::OperationQueue).
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──connected──> Connected ──ready──> Ready
//!      ▲                          │                                           │
//!      │                       failed                              disconnecting / watchdog
//!      │                          ▼                                           ▼
//!      │                    ConnectFailed ──connect()──> Connecting     Disconnecting
//!      │                                                                      │
//!      └──────────────────────────── disconnected ────────────────────────────┘
//! ```
//!
//! A disconnect forced by the watchdog reconnects to the same device
//! automatically; any other disconnect stays `Disconnected`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::ControllerError;
use crate::filter::Thresholds;
use crate::protocol::DeviceCommand;
use crate::sample::{Location, Sample};
use crate::storage::{ByteStore, CircularSampleLog};
use crate::transport::{DeviceId, EventSink, FailureReason, Transport};

mod actor;
mod operations;
mod rate;

pub use rate::RateTracker;

use actor::{Command, ControllerActor};

/// Capacity of the caller command channel.
const COMMAND_CAPACITY: usize = 64;
/// Capacity of the broadcast event channel.
const EVENT_CAPACITY: usize = 256;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Connect requested, waiting for the link.
    Connecting,
    /// Link up, sonar service not yet confirmed.
    Connected,
    /// Notifications flowing; the watchdog is armed.
    Ready,
    /// Teardown in progress.
    Disconnecting,
    /// The last connect attempt failed.
    ConnectFailed,
}

impl ConnectionState {
    /// Returns a short status label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Ready => "Ready",
            Self::Disconnecting => "Disconnecting...",
            Self::ConnectFailed => "Connect failed",
        }
    }

    /// True while a link exists or is being set up.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runtime settings passed to [`ControllerHandle::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Sonar gain, 0-10.
    pub sensitivity: u8,
    /// Noise rejection level, 0-4.
    pub noise: u8,
    /// Depth range index, 0-7.
    pub range: u8,
    /// Significant-change filter thresholds.
    pub thresholds: Thresholds,
    /// Watchdog period; zero disables the watchdog.
    pub sample_timeout: Duration,
}

impl DeviceSettings {
    /// The device-bound part of the settings.
    pub fn command(&self) -> DeviceCommand {
        DeviceCommand::configure(self.sensitivity, self.noise, self.range)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            sensitivity: 5,
            noise: 0,
            range: 6,
            thresholds: Thresholds::default(),
            sample_timeout: Duration::from_millis(5000),
        }
    }
}

/// Events broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A sample passed the filter and was appended to the log.
    Sample(Sample),
    /// A connect attempt failed.
    ConnectFailed(FailureReason),
}

/// Snapshot of controller counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerStats {
    /// State when the snapshot was taken.
    pub state: ConnectionState,
    /// Device of the current or last connection.
    pub device: Option<DeviceId>,
    /// Frames that decoded successfully.
    pub decoded: u64,
    /// Notifications rejected by the framer.
    pub dropped_frames: u64,
    /// Samples kept by the filter.
    pub accepted: u64,
    /// Samples dropped by the filter.
    pub rejected: u64,
    /// Samples that could not be persisted.
    pub storage_errors: u64,
    /// Reconnects forced by the watchdog.
    pub watchdog_reconnects: u64,
    /// Rolling sample rate in Hz.
    pub rate_hz: f64,
}

/// Entry point: spawns the actor.
pub struct ConnectionController;

impl ConnectionController {
    /// Spawn the controller task for `transport`, persisting to `log`.
    ///
    /// `operation_timeout` bounds every queued connect, write and disconnect.
    /// Must be called inside a tokio runtime.
    pub fn spawn<S>(
        transport: Arc<dyn Transport>,
        log: Arc<CircularSampleLog<S>>,
        settings: DeviceSettings,
        operation_timeout: Duration,
    ) -> ControllerHandle
    where
        S: ByteStore + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (sink, transport_events) = EventSink::channel();

        let actor = ControllerActor::new(
            transport,
            log,
            settings,
            operation_timeout,
            sink,
            state_tx,
            event_tx.clone(),
        );
        tokio::spawn(actor.run(command_rx, transport_events));

        ControllerHandle {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
        }
    }
}

/// Cloneable handle to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ControllerHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }

    /// Start connecting to `device`. Valid from `Disconnected` or `ConnectFailed`.
    pub async fn connect(&self, device: DeviceId) -> Result<(), ControllerError> {
        self.request(|reply| Command::Connect { device, reply })
            .await?
    }

    /// Tear down the current link without reconnecting.
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Apply new settings. Thresholds and the watchdog period change at once;
    /// the device command is only sent while `Ready` and is resent on every
    /// later transition to `Ready`.
    pub async fn configure(&self, settings: DeviceSettings) -> Result<(), ControllerError> {
        self.request(|reply| Command::Configure { settings, reply })
            .await?
    }

    /// Replace the cached current position.
    pub async fn update_location(&self, location: Location) -> Result<(), ControllerError> {
        self.commands
            .send(Command::UpdateLocation(location))
            .await
            .map_err(|_| ControllerError::Stopped)
    }

    /// Counters and rate snapshot.
    pub async fn stats(&self) -> Result<ControllerStats, ControllerError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// The latest published state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the controller publishes `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ControllerError> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| ControllerError::Stopped)
    }

    /// Receive state changes, samples and connect failures.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. Queued operations already handed to the transport
    /// still finish.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

#[cfg(test)]
mod tests;
