use std::sync::Arc;

use coopdoor_api::{Command, CommandOutcome, DoorSnapshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, oneshot, watch};

use crate::errors::DeviceError;
use crate::services::connection_service::{CommandResult, DeviceCommand, Envelope};

/// Front door to the connection worker.
///
/// Commands are queued FIFO behind the one in flight. When the queue is full
/// a new command is rejected with `Busy` rather than waiting.
#[derive(Clone)]
pub struct CommandChannel {
    requests: mpsc::Sender<Envelope>,
    snapshot: watch::Receiver<DoorSnapshot>,
    cancel: Arc<Notify>,
}

impl CommandChannel {
    pub(crate) fn new(
        requests: mpsc::Sender<Envelope>,
        snapshot: watch::Receiver<DoorSnapshot>,
        cancel: Arc<Notify>,
    ) -> Self {
        Self {
            requests,
            snapshot,
            cancel,
        }
    }

    pub async fn open(&self, percent: i32) -> CommandResult {
        let percent = validate_percent(percent)?;
        self.submit(DeviceCommand::Open { percent }).await
    }

    pub async fn close(&self) -> CommandResult {
        self.submit(DeviceCommand::Close).await
    }

    pub async fn connect(&self) -> CommandResult {
        self.submit(DeviceCommand::Connect).await
    }

    /// Also aborts a command that is waiting for the link to come up, once
    /// the disconnect itself has been queued.
    pub async fn disconnect(&self) -> CommandResult {
        let outcome = self.enqueue(DeviceCommand::Disconnect)?;
        self.cancel.notify_waiters();
        outcome.await.map_err(|_| DeviceError::WorkerStopped)?
    }

    /// Answered from the latest published snapshot without queueing.
    pub fn status(&self) -> CommandOutcome {
        CommandOutcome::new(true, self.snapshot())
    }

    pub fn snapshot(&self) -> DoorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DoorSnapshot> {
        self.snapshot.clone()
    }

    pub async fn execute(&self, command: Command) -> CommandResult {
        match command {
            Command::Open { percent } => self.open(percent).await,
            Command::Close => self.close().await,
            Command::Status => Ok(self.status()),
            Command::Connect => self.connect().await,
            Command::Disconnect => self.disconnect().await,
        }
    }

    /// Queues a command and hands back the slot its outcome arrives on.
    pub fn enqueue(
        &self,
        command: DeviceCommand,
    ) -> Result<oneshot::Receiver<CommandResult>, DeviceError> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .try_send(Envelope { command, reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => DeviceError::Busy,
                TrySendError::Closed(_) => DeviceError::WorkerStopped,
            })?;

        Ok(outcome)
    }

    async fn submit(&self, command: DeviceCommand) -> CommandResult {
        let outcome = self.enqueue(command)?;
        outcome.await.map_err(|_| DeviceError::WorkerStopped)?
    }
}

fn validate_percent(percent: i32) -> Result<u8, DeviceError> {
    u8::try_from(percent)
        .ok()
        .filter(|p| *p <= coopdoor_api::pulse::MAX_PERCENT)
        .ok_or_else(|| {
            DeviceError::InvalidArgument(format!("percent must be within 0..=100, got {percent}"))
        })
}
