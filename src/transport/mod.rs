//! Transport collaborator interface.
//!
//! A transport owns the radio (or serial) link to one sensor. Lifecycle and
//! data callbacks arrive on a driver-owned context, so they are not returned
//! from the trait methods. Instead each connection gets an [`EventSink`] and
//! the backend pushes [`TransportEvent`]s into it from whatever thread it
//! likes. The connection controller drains the other end of the channel on a
//! single task.
//!
//! # Backends
//!
//! - [`mock::MockTransport`]: scripted test double with a call log
//! - [`simulated::SimulatedTransport`]: synthetic sensor for demos
//! - `serial::SerialTransport`: classic serial / SPP link (feature `tokio_serial`)

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub mod mock;
#[cfg(feature = "tokio_serial")]
pub mod serial;
pub mod simulated;

pub use mock::MockTransport;
pub use simulated::SimulatedTransport;

/// Identifier of a sensor on a transport (MAC address, serial port path...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Wrap a backend-specific identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The connect operation did not complete in time.
    Timeout,
    /// The link came up but the sonar service or characteristics are missing.
    ServiceMissing,
    /// The stack reported a status code (e.g. a GATT status).
    Status(i32),
    /// Any other backend-specific failure.
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("connect timed out"),
            FailureReason::ServiceMissing => f.write_str("sonar service not found"),
            FailureReason::Status(code) => write!(f, "status {code}"),
            FailureReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// Why a link went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The link was lost (out of range, device powered off...).
    LinkLost(String),
}

/// Callbacks from a transport backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The backend started connecting.
    Connecting,
    /// Link established, services not yet confirmed.
    Connected,
    /// Required characteristics present and notifications enabled.
    Ready,
    /// The connect attempt failed.
    Failed(FailureReason),
    /// Teardown started.
    Disconnecting,
    /// The link is gone.
    Disconnected(DisconnectReason),
    /// One inbound data notification.
    Notification(Bytes),
}

/// Sending half of a transport event channel.
///
/// Cheap to clone and safe to use from any thread. Events sent after the
/// controller has stopped are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push one event. Returns false if nobody is listening any more.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report [`TransportEvent::Connecting`]. Returns `false` once the controller is gone.
    pub fn connecting(&self) -> bool {
        self.emit(TransportEvent::Connecting)
    }

    /// Report [`TransportEvent::Connected`].
    pub fn connected(&self) -> bool {
        self.emit(TransportEvent::Connected)
    }

    /// Report [`TransportEvent::Ready`].
    pub fn ready(&self) -> bool {
        self.emit(TransportEvent::Ready)
    }

    /// Report [`TransportEvent::Failed`].
    pub fn failed(&self, reason: FailureReason) -> bool {
        self.emit(TransportEvent::Failed(reason))
    }

    /// Report [`TransportEvent::Disconnecting`].
    pub fn disconnecting(&self) -> bool {
        self.emit(TransportEvent::Disconnecting)
    }

    /// Report [`TransportEvent::Disconnected`].
    pub fn disconnected(&self, reason: DisconnectReason) -> bool {
        self.emit(TransportEvent::Disconnected(reason))
    }

    /// Deliver one inbound frame.
    pub fn notify(&self, bytes: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Notification(bytes.into()))
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A link to one sensor.
///
/// Implementations must tolerate being driven strictly sequentially: the
/// operation queue never calls two of these concurrently. The returned future
/// completing means the request was issued (or failed); progress is reported
/// through the [`EventSink`] given to `connect`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting to `device`, reporting lifecycle events to `events`.
    async fn connect(&self, device: &DeviceId, events: EventSink) -> Result<(), TransportError>;

    /// Tear down the current link. Emits `Disconnecting` then `Disconnected`.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Write one command to the sensor.
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.connecting());
        assert!(sink.notify(vec![1u8, 2, 3]));
        assert!(sink.disconnected(DisconnectReason::Requested));

        assert_eq!(rx.recv().await, Some(TransportEvent::Connecting));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Notification(Bytes::from_static(&[1, 2, 3])))
        );
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Disconnected(DisconnectReason::Requested))
        );

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.ready());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Status(133).to_string(), "status 133");
        assert_eq!(FailureReason::Timeout.to_string(), "connect timed out");
        assert_eq!(DeviceId::new("AA:BB").to_string(), "AA:BB");
    }
}
