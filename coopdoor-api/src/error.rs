use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure categories shared by the daemon, the scheduler and their callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No live link to the controller and none came up in time
    DeviceUnavailable,
    /// A connect attempt exceeded its timeout
    ConnectTimeout,
    /// Request parameters are out of range
    InvalidArgument,
    /// The command queue is full
    Busy,
    /// No valid open/close pair exists for the requested date
    UnresolvableSchedule,
    /// Daily triggers could not be installed
    TriggerInstallFailed,
    /// The automation config selects no mode, or both
    ConfigInconsistent,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnavailable => "device_unavailable",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Busy => "busy",
            ErrorKind::UnresolvableSchedule => "unresolvable_schedule",
            ErrorKind::TriggerInstallFailed => "trigger_install_failed",
            ErrorKind::ConfigInconsistent => "config_inconsistent",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::DeviceUnavailable | ErrorKind::ConnectTimeout | ErrorKind::Busy
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried on the command socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
