#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Message serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Message deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// Message exceeds size limit
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
    /// Peer closed the stream before a full frame arrived
    #[error("Connection closed")]
    Closed,
    #[error("Timed out waiting for the peer")]
    Timeout,
}

pub type Result<T> = core::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::MessageTooLarge(1000000).to_string(),
            "Message too large: 1000000 bytes"
        );
        assert_eq!(TransportError::Closed.to_string(), "Connection closed");
    }
}
