use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use coopdoor_api::ErrorKind;
use coopdoor_api::client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid automation config: {0}")]
    InvalidArgument(String),

    #[error("Inconsistent automation config: {0}")]
    ConfigInconsistent(String),

    #[error("No schedule for {date} at ({latitude}, {longitude}): {reason}")]
    UnresolvableSolar {
        date: NaiveDate,
        latitude: f64,
        longitude: f64,
        reason: String,
    },

    #[error("No schedule for {date}: {reason}")]
    Unresolvable { date: NaiveDate, reason: String },

    #[error("Failed to install trigger {}: {source}", path.display())]
    TriggerInstall {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("systemctl {args} failed: {detail}")]
    SystemCtl { args: String, detail: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write schedule state {}: {source}", path.display())]
    StateWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Door {action} did not complete: {detail}")]
    CommandFailed { action: &'static str, detail: String },

    #[error(transparent)]
    Door(#[from] ClientError),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ScheduleError::ConfigInconsistent(_) => ErrorKind::ConfigInconsistent,
            ScheduleError::UnresolvableSolar { .. } | ScheduleError::Unresolvable { .. } => {
                ErrorKind::UnresolvableSchedule
            }
            ScheduleError::TriggerInstall { .. } | ScheduleError::SystemCtl { .. } => {
                ErrorKind::TriggerInstallFailed
            }
            ScheduleError::Read { .. } | ScheduleError::StateWrite { .. } => ErrorKind::Internal,
            ScheduleError::Parse { .. } => ErrorKind::InvalidArgument,
            ScheduleError::CommandFailed { .. } => ErrorKind::DeviceUnavailable,
            ScheduleError::Door(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = ScheduleError::UnresolvableSolar {
            date: NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(),
            latitude: 78.22,
            longitude: 15.65,
            reason: "sun never sets".into(),
        };
        assert_eq!(err.kind(), ErrorKind::UnresolvableSchedule);
        assert_eq!(
            err.to_string(),
            "No schedule for 2024-06-21 at (78.22, 15.65): sun never sets"
        );

        let err = ScheduleError::TriggerInstall {
            path: PathBuf::from("/etc/systemd/system/coopdoor-open.timer"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.kind(), ErrorKind::TriggerInstallFailed);
        assert!(err.to_string().contains("coopdoor-open.timer"));
    }
}
