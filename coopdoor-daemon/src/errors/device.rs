use std::time::Duration;

use coopdoor_api::{ErrorBody, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Connect attempt exceeded {0:?}")]
    ConnectTimeout(Duration),

    #[error("Invalid request parameters: {0}")]
    InvalidArgument(String),

    #[error("Command queue is full")]
    Busy,

    #[error("Connection worker has stopped")]
    WorkerStopped,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Unavailable(_) => ErrorKind::DeviceUnavailable,
            DeviceError::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            DeviceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DeviceError::Busy => ErrorKind::Busy,
            DeviceError::WorkerStopped => ErrorKind::Internal,
        }
    }
}

impl From<DeviceError> for ErrorBody {
    fn from(error: DeviceError) -> Self {
        ErrorBody::new(error.kind(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(DeviceError::Busy.kind(), ErrorKind::Busy);
        assert_eq!(
            DeviceError::ConnectTimeout(Duration::from_secs(15)).kind(),
            ErrorKind::ConnectTimeout
        );

        let body = ErrorBody::from(DeviceError::InvalidArgument("percent 101".into()));
        assert_eq!(body.kind, ErrorKind::InvalidArgument);
        assert_eq!(body.message, "Invalid request parameters: percent 101");
    }
}
