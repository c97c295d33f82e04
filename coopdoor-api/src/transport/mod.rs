//! Newline-delimited JSON framing used on the daemon's command socket.
//!
//! Every frame is a single JSON document followed by `\n`.

mod error;

pub use error::{Result, TransportError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 64 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes =
        serde_json::to_vec(message).map_err(|e| TransportError::Serialization(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(TransportError::MessageTooLarge(bytes.len()));
    }
    bytes.push(b'\n');

    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `None` when the peer closed the stream cleanly.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_FRAME_SIZE as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > MAX_FRAME_SIZE {
        return Err(TransportError::MessageTooLarge(line.len()));
    }

    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| TransportError::Deserialization(e.to_string()))
}
