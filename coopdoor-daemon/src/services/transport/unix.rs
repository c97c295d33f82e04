use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use coopdoor_api::transport::{TransportError, read_frame, write_frame};
use coopdoor_api::{ErrorBody, ErrorKind, Request, Response};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::services::CommandChannel;

const SOCKET_MODE: u32 = 0o660;

/// Serves the command channel on a Unix socket, one request per connection.
pub struct UnixTransport {
    path: PathBuf,
    channel: CommandChannel,
}

impl UnixTransport {
    pub fn new(path: impl AsRef<Path>, channel: CommandChannel) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            channel,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds the socket. Refuses to start if another daemon already answers on it.
    async fn bind(&self) -> io::Result<UnixListener> {
        if self.path.exists() {
            if UnixStream::connect(&self.path).await.is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("another daemon is serving {}", self.path.display()),
                ));
            }
            tracing::info!(path = %self.path.display(), "removing stale socket");
            std::fs::remove_file(&self.path)?;
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.path)?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

        Ok(listener)
    }

    pub async fn start(&self) -> io::Result<oneshot::Sender<()>> {
        let listener = self.bind().await?;
        tracing::info!("command socket listening on {}", self.path.display());

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let channel = self.channel.clone();
        let path = self.path.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::info!("command socket shutting down");
                        break;
                    },
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                let channel = channel.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = Self::handle_connection(stream, channel).await {
                                        tracing::warn!("command connection failed: {}", e);
                                    }
                                });
                            },
                            Err(e) => {
                                tracing::error!("Failed to accept command connection: {}", e);
                            }
                        }
                    }
                }
            }

            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "socket already gone");
            }
        });

        Ok(stop_tx)
    }

    async fn handle_connection(
        stream: UnixStream,
        channel: CommandChannel,
    ) -> Result<(), TransportError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request: Request = match read_frame(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable request");
                let body = ErrorBody::new(ErrorKind::InvalidArgument, format!("malformed request: {e}"));
                return write_frame(&mut write_half, &Response::error(Uuid::nil(), body)).await;
            }
        };

        let request_id = request.id;
        let command = request.command.name();
        tracing::info!(%request_id, command, "request received");

        let response = match channel.execute(request.command).await {
            Ok(outcome) => {
                tracing::info!(%request_id, command, succeeded = outcome.succeeded, "request completed");
                Response::ok(request_id, outcome)
            }
            Err(e) => {
                tracing::warn!(%request_id, command, error = %e, "request rejected");
                Response::error(request_id, e.into())
            }
        };

        write_frame(&mut write_half, &response).await
    }
}
