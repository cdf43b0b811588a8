//! The controller task.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::operations::{ConnectOp, DisconnectOp, SendCommandOp};
use super::{
    ConnectionState, ControllerEvent, ControllerStats, DeviceSettings, RateTracker,
};
use crate::error::ControllerError;
use crate::filter;
use crate::protocol;
use crate::queue::{OperationOutcome, OperationQueue};
use crate::sample::{Location, Sample};
use crate::storage::{ByteStore, CircularSampleLog};
use crate::transport::{
    DeviceId, DisconnectReason, EventSink, FailureReason, Transport, TransportEvent,
};

type Reply<T> = oneshot::Sender<T>;

/// Requests sent by [`super::ControllerHandle`].
pub(crate) enum Command {
    Connect {
        device: DeviceId,
        reply: Reply<Result<(), ControllerError>>,
    },
    Disconnect {
        reply: Reply<Result<(), ControllerError>>,
    },
    Configure {
        settings: DeviceSettings,
        reply: Reply<Result<(), ControllerError>>,
    },
    UpdateLocation(Location),
    Stats {
        reply: Reply<ControllerStats>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Repeating no-sample detector.
struct Watchdog {
    ticker: Interval,
    period: Duration,
    sample_seen: bool,
}

impl Watchdog {
    /// Armed with the flag raised, so the first period is a grace period.
    fn arm(period: Duration) -> Option<Self> {
        if period.is_zero() {
            return None;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(Self {
            ticker,
            period,
            sample_seen: true,
        })
    }
}

async fn next_tick(watchdog: &mut Option<Watchdog>) {
    match watchdog {
        Some(watchdog) => {
            watchdog.ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

pub(crate) struct ControllerActor<S: ByteStore> {
    queue: OperationQueue<dyn Transport>,
    transport_name: String,
    log: Arc<CircularSampleLog<S>>,
    settings: DeviceSettings,
    operation_timeout: Duration,
    sink: EventSink,

    state: ConnectionState,
    device: Option<DeviceId>,
    location: Location,
    last_accepted: Option<Sample>,
    watchdog: Option<Watchdog>,
    reconnect_pending: bool,
    rate: RateTracker,
    stats: ControllerStats,

    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl<S: ByteStore + 'static> ControllerActor<S> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        log: Arc<CircularSampleLog<S>>,
        settings: DeviceSettings,
        operation_timeout: Duration,
        sink: EventSink,
        state_tx: watch::Sender<ConnectionState>,
        event_tx: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        let transport_name = transport.name().to_string();
        Self {
            queue: OperationQueue::new(transport),
            transport_name,
            log,
            settings,
            operation_timeout,
            sink,
            state: ConnectionState::Disconnected,
            device: None,
            location: Location::default(),
            last_accepted: None,
            watchdog: None,
            reconnect_pending: false,
            rate: RateTracker::new(),
            stats: ControllerStats::default(),
            state_tx,
            event_tx,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!(transport = %self.transport_name, "Connection controller started");
        loop {
            tokio::select! {
                biased;

                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                () = next_tick(&mut self.watchdog) => self.on_watchdog_tick(),
            }
        }
        info!(transport = %self.transport_name, "Connection controller stopped");
    }

    fn stop(&mut self) {
        self.watchdog = None;
        self.reconnect_pending = false;
        self.queue.close();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { device, reply } => {
                let _ = reply.send(self.connect(device));
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            }
            Command::Configure { settings, reply } => {
                let _ = reply.send(self.configure(settings));
            }
            Command::UpdateLocation(location) => {
                self.location = location;
            }
            Command::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.state = self.state;
                stats.device = self.device.clone();
                stats.rate_hz = self.rate.rate_hz();
                let _ = reply.send(stats);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self, device: DeviceId) -> Result<(), ControllerError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::ConnectFailed => {
                self.reconnect_pending = false;
                self.start_connect(device)
            }
            state => Err(ControllerError::InvalidState {
                action: "connect",
                state,
            }),
        }
    }

    fn disconnect(&mut self) -> Result<(), ControllerError> {
        match self.state {
            ConnectionState::Disconnected => Err(ControllerError::InvalidState {
                action: "disconnect",
                state: self.state,
            }),
            ConnectionState::Disconnecting => Ok(()),
            ConnectionState::ConnectFailed => {
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            _ => {
                self.reconnect_pending = false;
                self.watchdog = None;
                self.start_disconnect()
            }
        }
    }

    fn configure(&mut self, settings: DeviceSettings) -> Result<(), ControllerError> {
        let period_changed = settings.sample_timeout != self.settings.sample_timeout;
        self.settings = settings;
        debug!(settings = ?self.settings, "Settings updated");

        if self.state == ConnectionState::Ready {
            if period_changed {
                self.watchdog = Watchdog::arm(self.settings.sample_timeout);
            }
            self.send_configuration()?;
        }
        Ok(())
    }

    fn start_connect(&mut self, device: DeviceId) -> Result<(), ControllerError> {
        info!(device = %device, transport = %self.transport_name, "Connecting");
        self.device = Some(device.clone());
        self.last_accepted = None;
        self.set_state(ConnectionState::Connecting);

        let op = ConnectOp {
            device,
            sink: self.sink.clone(),
            timeout: self.operation_timeout,
        };
        let done = match self.queue.enqueue(op) {
            Ok(done) => done,
            Err(e) => {
                self.set_state(ConnectionState::ConnectFailed);
                return Err(e.into());
            }
        };

        // A connect that errors or times out never reaches `Ready`; report it
        // through the same path as a transport-level failure.
        let sink = self.sink.clone();
        tokio::spawn(async move {
            match done.await {
                OperationOutcome::Succeeded => {}
                OperationOutcome::TimedOut => {
                    sink.failed(FailureReason::Timeout);
                }
                OperationOutcome::Failed(msg) => {
                    sink.failed(FailureReason::Other(msg));
                }
            }
        });
        Ok(())
    }

    fn start_disconnect(&mut self) -> Result<(), ControllerError> {
        let done = self.queue.enqueue(DisconnectOp {
            timeout: self.operation_timeout,
        })?;

        // If the backend could not tear the link down it will not report
        // `Disconnected` either; treat the link as lost.
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let outcome = done.await;
            if !outcome.is_success() {
                sink.disconnected(DisconnectReason::LinkLost(format!(
                    "disconnect did not complete: {outcome:?}"
                )));
            }
        });
        Ok(())
    }

    fn send_configuration(&mut self) -> Result<(), ControllerError> {
        let command = self.settings.command();
        debug!(command = ?command, "Sending device configuration");
        self.queue.enqueue(SendCommandOp {
            command: command.encode(),
            timeout: self.operation_timeout,
        })?;
        Ok(())
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        info!(from = %self.state, to = %next, "Connection state changed");
        self.state = next;
        self.state_tx.send_replace(next);
        let _ = self.event_tx.send(ControllerEvent::StateChanged(next));
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => match self.state {
                ConnectionState::Disconnected
                | ConnectionState::ConnectFailed
                | ConnectionState::Connecting => self.set_state(ConnectionState::Connecting),
                state => debug!(state = %state, "Ignoring connecting callback"),
            },
            TransportEvent::Connected => match self.state {
                ConnectionState::Connecting => self.set_state(ConnectionState::Connected),
                state => debug!(state = %state, "Ignoring connected callback"),
            },
            TransportEvent::Ready => match self.state {
                ConnectionState::Connecting | ConnectionState::Connected => self.on_ready(),
                state => debug!(state = %state, "Ignoring ready callback"),
            },
            TransportEvent::Failed(reason) => match self.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    warn!(reason = %reason, "Connect failed");
                    self.watchdog = None;
                    self.reconnect_pending = false;
                    self.set_state(ConnectionState::ConnectFailed);
                    let _ = self.event_tx.send(ControllerEvent::ConnectFailed(reason));
                }
                state => debug!(state = %state, reason = %reason, "Ignoring failure callback"),
            },
            TransportEvent::Disconnecting => {
                self.watchdog = None;
                self.set_state(ConnectionState::Disconnecting);
            }
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
            TransportEvent::Notification(bytes) => self.on_notification(bytes),
        }
    }

    fn on_ready(&mut self) {
        self.set_state(ConnectionState::Ready);
        self.rate.reset();
        self.watchdog = Watchdog::arm(self.settings.sample_timeout);
        if let Err(e) = self.send_configuration() {
            error!(error = %e, "Could not queue device configuration");
        }
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.watchdog = None;
        if self.state == ConnectionState::Disconnected && !self.reconnect_pending {
            debug!(reason = ?reason, "Already disconnected");
            return;
        }
        info!(reason = ?reason, "Disconnected");
        self.set_state(ConnectionState::Disconnected);

        if std::mem::take(&mut self.reconnect_pending) {
            if let Some(device) = self.device.clone() {
                info!(device = %device, "Reconnecting after watchdog timeout");
                if let Err(e) = self.start_connect(device) {
                    error!(error = %e, "Automatic reconnect could not be queued");
                }
            }
        }
    }

    fn on_watchdog_tick(&mut self) {
        let Some(watchdog) = self.watchdog.as_mut() else {
            return;
        };
        if watchdog.sample_seen {
            watchdog.sample_seen = false;
            return;
        }

        warn!(
            period = ?watchdog.period,
            device = ?self.device,
            "No sample within watchdog period, forcing reconnect"
        );
        self.watchdog = None;
        self.reconnect_pending = true;
        self.stats.watchdog_reconnects += 1;
        if let Err(e) = self.start_disconnect() {
            error!(error = %e, "Watchdog disconnect could not be queued");
            self.reconnect_pending = false;
        }
    }

    fn on_notification(&mut self, bytes: Bytes) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Ready
        ) {
            debug!(state = %self.state, len = bytes.len(), "Dropping notification");
            return;
        }

        let reading = match protocol::decode(&bytes) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "Dropping undecodable frame");
                self.stats.dropped_frames += 1;
                return;
            }
        };
        self.stats.decoded += 1;
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.sample_seen = true;
        }

        let sample = Sample::from_reading(&reading, self.location, Utc::now().timestamp_millis());
        if !filter::accept(&sample, self.last_accepted.as_ref(), &self.settings.thresholds) {
            self.stats.rejected += 1;
            return;
        }

        self.stats.accepted += 1;
        self.rate.record(Instant::now());
        if let Err(e) = self.log.append(&sample) {
            self.stats.storage_errors += 1;
            error!(error = %e, "Failed to persist sample");
        }
        self.last_accepted = Some(sample);
        let _ = self.event_tx.send(ControllerEvent::Sample(sample));
    }
}
