use std::io;
use std::path::PathBuf;

use coopdoor_api::pulse::MAX_PERCENT;
use serde::Deserialize;

/// Where the maximum opening percentage comes from. 0 means no cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenCap {
    Unlimited,
    Fixed(u8),
    /// Read `open_percent` from the automation file on every open, so edits
    /// take effect without a restart
    File(PathBuf),
}

#[derive(Deserialize)]
struct CapField {
    #[serde(default)]
    open_percent: Option<i64>,
}

impl OpenCap {
    pub async fn current(&self) -> u8 {
        match self {
            OpenCap::Unlimited => 0,
            OpenCap::Fixed(cap) => *cap,
            OpenCap::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => match serde_json::from_str::<CapField>(&text) {
                    Ok(field) => field
                        .open_percent
                        .map(|p| p.clamp(0, i64::from(MAX_PERCENT)) as u8)
                        .unwrap_or(0),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "automation file unreadable, opening without a cap");
                        0
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "automation file unreadable, opening without a cap");
                    0
                }
            },
        }
    }
}
