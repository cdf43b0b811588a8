//! Queued transport operations issued by the controller.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::OperationError;
use crate::protocol::COMMAND_LEN;
use crate::queue::Operation;
use crate::transport::{DeviceId, EventSink, Transport};

pub(crate) struct ConnectOp {
    pub device: DeviceId,
    pub sink: EventSink,
    pub timeout: Duration,
}

#[async_trait]
impl<T: Transport + ?Sized> Operation<T> for ConnectOp {
    fn name(&self) -> &str {
        "connect"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, transport: &T) -> Result<(), OperationError> {
        transport.connect(&self.device, self.sink.clone()).await?;
        Ok(())
    }
}

pub(crate) struct DisconnectOp {
    pub timeout: Duration,
}

#[async_trait]
impl<T: Transport + ?Sized> Operation<T> for DisconnectOp {
    fn name(&self) -> &str {
        "disconnect"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, transport: &T) -> Result<(), OperationError> {
        transport.disconnect().await?;
        Ok(())
    }
}

/// Writes one configuration command.
pub(crate) struct SendCommandOp {
    pub command: [u8; COMMAND_LEN],
    pub timeout: Duration,
}

#[async_trait]
impl<T: Transport + ?Sized> Operation<T> for SendCommandOp {
    fn name(&self) -> &str {
        "send_command"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, transport: &T) -> Result<(), OperationError> {
        transport.send(&self.command).await?;
        Ok(())
    }
}
