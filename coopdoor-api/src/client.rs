use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::error::{ErrorBody, ErrorKind};
use crate::models::{Command, CommandOutcome, Reply, Request, Response};
use crate::transport::{TransportError, read_frame, write_frame};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("command socket unreachable: {0}")]
    Transport(#[from] TransportError),

    #[error("{command} rejected: {body}")]
    Rejected { command: &'static str, body: ErrorBody },

    #[error("response does not answer the request that was sent")]
    Mismatch,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) => ErrorKind::DeviceUnavailable,
            ClientError::Rejected { body, .. } => body.kind,
            ClientError::Mismatch => ErrorKind::Internal,
        }
    }
}

/// The door operations a trigger needs.
#[async_trait]
pub trait DoorControl: Send + Sync {
    async fn open(&self, percent: i32) -> Result<CommandOutcome, ClientError>;

    async fn close(&self) -> Result<CommandOutcome, ClientError>;
}

/// Talks to the daemon over its Unix command socket, one connection per request.
#[derive(Debug, Clone)]
pub struct DoorClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DoorClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn status(&self) -> Result<CommandOutcome, ClientError> {
        self.call(Command::Status).await
    }

    pub async fn connect(&self) -> Result<CommandOutcome, ClientError> {
        self.call(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<CommandOutcome, ClientError> {
        self.call(Command::Disconnect).await
    }

    pub async fn call(&self, command: Command) -> Result<CommandOutcome, ClientError> {
        let request = Request::new(command);

        let exchange = async {
            let stream = UnixStream::connect(&self.socket_path).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_frame(&mut write_half, &request).await?;

            let mut reader = BufReader::new(read_half);
            read_frame::<_, Response>(&mut reader)
                .await?
                .ok_or(TransportError::Closed)
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout)??;

        if response.id != request.id {
            return Err(ClientError::Mismatch);
        }

        match response.reply {
            Reply::Ok(outcome) => Ok(outcome),
            Reply::Error(body) => Err(ClientError::Rejected {
                command: command.name(),
                body,
            }),
        }
    }
}

#[async_trait]
impl DoorControl for DoorClient {
    async fn open(&self, percent: i32) -> Result<CommandOutcome, ClientError> {
        self.call(Command::Open { percent }).await
    }

    async fn close(&self) -> Result<CommandOutcome, ClientError> {
        self.call(Command::Close).await
    }
}
