//! Mock transport for testing
//!
//! Drives the controller without a radio. It provides:
//! - Scripted lifecycle events on connect (auto-ready, manual, or failing)
//! - Controllable failure injection and hanging operations
//! - Call logging and captured outbound commands for test verification

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

use super::{DeviceId, DisconnectReason, EventSink, FailureReason, Transport};
use crate::error::TransportError;

/// What the mock does when `connect` is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Emit `Connecting`, `Connected`, then `Ready`.
    AutoReady,
    /// Emit `Connecting` and `Connected`; the test emits `Ready` itself.
    StopAtConnected,
    /// Emit nothing; the test drives the sink.
    Manual,
    /// Emit `Connecting` then `Failed(reason)`.
    Fail(FailureReason),
}

#[derive(Debug, Default)]
struct MockState {
    call_log: Vec<String>,
    sent: Vec<Vec<u8>>,
    sink: Option<EventSink>,
}

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use fishfinder::transport::{DeviceId, EventSink, MockTransport, Transport, TransportEvent};
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new();
/// let (sink, mut events) = EventSink::channel();
/// transport.connect(&DeviceId::new("mock"), sink).await.unwrap();
/// assert_eq!(events.recv().await, Some(TransportEvent::Connecting));
/// assert!(transport.is_connected());
/// # })
/// ```
#[derive(Debug)]
pub struct MockTransport {
    behavior: Mutex<ConnectBehavior>,
    connected: AtomicBool,
    should_fail_next: AtomicBool,
    hang: AtomicBool,
    latency: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock that reaches `Ready` on every connect.
    pub fn new() -> Self {
        Self::with_behavior(ConnectBehavior::AutoReady)
    }

    /// A mock that connects according to `behavior`.
    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            connected: AtomicBool::new(false),
            should_fail_next: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Set simulated per-call latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Change how later connects behave.
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Make the next call return an error.
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every later call hang forever (until its timeout drops it).
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Get a copy of the call log for verification
    pub fn get_call_log(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    /// Count entries in the call log starting with `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|entry| entry.split(' ').next() == Some(method))
            .count()
    }

    /// Clear the call log
    pub fn clear_call_log(&self) {
        self.state().call_log.clear();
    }

    /// Commands written with `send`.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    /// The sink handed over by the most recent `connect`.
    pub fn sink(&self) -> Option<EventSink> {
        self.state().sink.clone()
    }

    /// Push a notification on the current link. Returns false if not linked.
    pub fn notify(&self, bytes: &[u8]) -> bool {
        self.sink().is_some_and(|sink| sink.notify(bytes.to_vec()))
    }

    /// Drop the link as if the device went out of range.
    pub fn lose_link(&self, why: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(sink) = self.sink() {
            sink.disconnected(DisconnectReason::LinkLost(why.to_string()));
        }
    }

    /// Whether the mock link is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn log_call(&self, entry: String) {
        self.state().call_log.push(entry);
    }

    async fn simulate_io(&self) -> Result<(), TransportError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Other("mock failure".into()));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, device: &DeviceId, events: EventSink) -> Result<(), TransportError> {
        self.log_call(format!("connect {device}"));
        self.simulate_io()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.state().sink = Some(events.clone());
        let behavior = lock(&self.behavior).clone();
        match behavior {
            ConnectBehavior::AutoReady => {
                events.connecting();
                self.connected.store(true, Ordering::SeqCst);
                events.connected();
                events.ready();
            }
            ConnectBehavior::StopAtConnected => {
                events.connecting();
                self.connected.store(true, Ordering::SeqCst);
                events.connected();
            }
            ConnectBehavior::Manual => {
                self.connected.store(true, Ordering::SeqCst);
            }
            ConnectBehavior::Fail(reason) => {
                events.connecting();
                events.failed(reason);
            }
        }
        info!(device = %device, "MockTransport connect issued");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.log_call("disconnect".to_string());
        self.simulate_io().await?;

        self.connected.store(false, Ordering::SeqCst);
        if let Some(sink) = self.sink() {
            sink.disconnecting();
            sink.disconnected(DisconnectReason::Requested);
        }
        info!("MockTransport disconnected");
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.log_call(format!("send {}", bytes.len()));
        self.simulate_io().await?;
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.state().sent.push(bytes.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
