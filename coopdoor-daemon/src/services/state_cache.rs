use std::io;
use std::path::{Path, PathBuf};

use coopdoor_api::{DoorPosition, LastEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;

const POSITION_FILE: &str = "door_state.json";
const LAST_EVENT_FILE: &str = "last_action.json";

/// Persists the advisory position and the last event across restarts.
#[derive(Debug, Clone)]
pub struct StateCache {
    dir: PathBuf,
}

impl StateCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub async fn load_position(&self) -> Option<DoorPosition> {
        self.load(POSITION_FILE).await
    }

    pub async fn load_last_event(&self) -> Option<LastEvent> {
        self.load(LAST_EVENT_FILE).await
    }

    pub async fn store(
        &self,
        position: Option<&DoorPosition>,
        last_event: Option<&LastEvent>,
    ) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        if let Some(position) = position {
            self.write(POSITION_FILE, position).await?;
        }
        if let Some(last_event) = last_event {
            self.write(LAST_EVENT_FILE, last_event).await?;
        }
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read cached state");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed cached state");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, name: &str, value: &T) -> io::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}
