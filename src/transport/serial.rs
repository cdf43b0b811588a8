//! Classic serial (RFCOMM/SPP) sensor link.
//!
//! The sensor's classic-Bluetooth variant shows up as a serial port and
//! streams frames back to back. Frames are recovered with
//! [`FrameAssembler`] and pushed to the sink one notification at a time.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::{DeviceId, DisconnectReason, EventSink, FailureReason, Transport};
use crate::error::TransportError;
use crate::protocol::FrameAssembler;

/// Serial link; the [`DeviceId`] is the port path (e.g. `/dev/rfcomm0`).
pub struct SerialTransport {
    baud_rate: u32,
    link: Mutex<Option<SerialLink>>,
}

struct SerialLink {
    writer: WriteHalf<SerialStream>,
    reader: JoinHandle<()>,
    sink: EventSink,
}

impl SerialTransport {
    /// A serial backend opening ports at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            link: Mutex::new(None),
        }
    }
}

async fn read_loop(mut reader: ReadHalf<SerialStream>, sink: EventSink) {
    let mut assembler = FrameAssembler::new();
    let mut buffer = [0u8; 256];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                sink.disconnected(DisconnectReason::LinkLost("end of stream".into()));
                break;
            }
            Ok(n) => {
                for frame in assembler.push(&buffer[..n]) {
                    if !sink.notify(frame.to_vec()) {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Serial read failed");
                sink.disconnected(DisconnectReason::LinkLost(e.to_string()));
                break;
            }
        }
    }
    debug!(discarded = assembler.discarded(), "Serial reader stopped");
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self, device: &DeviceId, events: EventSink) -> Result<(), TransportError> {
        events.connecting();
        let stream = match tokio_serial::new(device.as_str(), self.baud_rate).open_native_async() {
            Ok(stream) => stream,
            Err(e) => {
                events.failed(FailureReason::Other(e.to_string()));
                return Err(TransportError::ConnectionFailed(e.to_string()));
            }
        };
        events.connected();

        let (reader, writer) = tokio::io::split(stream);
        let reader = tokio::spawn(read_loop(reader, events.clone()));

        let mut link = self.link.lock().await;
        if let Some(old) = link.take() {
            old.reader.abort();
        }
        *link = Some(SerialLink {
            writer,
            reader,
            sink: events.clone(),
        });
        drop(link);

        info!(port = %device, baud = self.baud_rate, "Serial sensor link open");
        events.ready();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let link = self.link.lock().await.take();
        let Some(mut link) = link else {
            return Err(TransportError::NotConnected);
        };
        link.sink.disconnecting();
        link.reader.abort();
        if let Err(e) = link.writer.shutdown().await {
            debug!(error = %e, "Serial shutdown error ignored");
        }
        link.sink.disconnected(DisconnectReason::Requested);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(TransportError::NotConnected)?;
        link.writer
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        link.writer
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        "serial"
    }
}
