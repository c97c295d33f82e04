use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::configs::ModeKind;
use crate::errors::ScheduleError;
use crate::installer::InstallReport;
use crate::resolver::ResolvedSchedule;

/// The day's schedule as installed, and which of its actions have fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub date: NaiveDate,
    pub mode: ModeKind,
    pub timezone: String,
    pub resolved_open_at: DateTime<FixedOffset>,
    pub resolved_close_at: DateTime<FixedOffset>,
    pub open_percent: u8,
    pub open_armed: bool,
    pub close_armed: bool,
    pub open_fired: bool,
    pub close_fired: bool,
    pub installed_at: DateTime<Utc>,
}

impl ScheduleState {
    pub fn new(schedule: &ResolvedSchedule, report: &InstallReport, installed_at: DateTime<Utc>) -> Self {
        Self {
            date: schedule.date,
            mode: schedule.mode,
            timezone: schedule.timezone.clone(),
            resolved_open_at: schedule.open_at,
            resolved_close_at: schedule.close_at,
            open_percent: schedule.open_percent,
            open_armed: report.open_armed(),
            close_armed: report.close_armed(),
            open_fired: false,
            close_fired: false,
            installed_at,
        }
    }

    /// Armed close that had not fired by `at`.
    fn close_pending_at(&self, at: DateTime<Utc>) -> bool {
        self.close_armed && !self.close_fired && self.resolved_close_at > at
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    current: Option<ScheduleState>,
    /// Earlier day whose close was still pending when `current` replaced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    carried_over: Option<ScheduleState>,
}

impl StateFile {
    fn day_mut(&mut self, date: NaiveDate) -> Option<&mut ScheduleState> {
        [self.current.as_mut(), self.carried_over.as_mut()]
            .into_iter()
            .flatten()
            .find(|s| s.date == date)
    }
}

/// Single-writer JSON file holding the latest [`ScheduleState`], plus the
/// previous day while its close has yet to fire.
#[derive(Debug, Clone)]
pub struct ScheduleStateStore {
    path: PathBuf,
}

impl ScheduleStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recently installed day. `None` when nothing was stored yet.
    pub fn load(&self) -> Result<Option<ScheduleState>, ScheduleError> {
        Ok(self.read()?.current)
    }

    /// The stored state for `date`, if that day is still tracked.
    pub fn load_day(&self, date: NaiveDate) -> Result<Option<ScheduleState>, ScheduleError> {
        Ok(self.read()?.day_mut(date).cloned())
    }

    /// Stores `state` as the current day.
    ///
    /// Replacing a different day keeps that day aside while its close is
    /// still pending, so it can still fire and be marked.
    pub fn save(&self, state: &ScheduleState) -> Result<(), ScheduleError> {
        let previous = match self.read() {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "replacing unreadable schedule state");
                StateFile::default()
            }
        };

        let carried_over = if previous.current.as_ref().is_some_and(|s| s.date == state.date) {
            previous.carried_over
        } else {
            [previous.current, previous.carried_over]
                .into_iter()
                .flatten()
                .find(|s| s.date != state.date && s.close_pending_at(state.installed_at))
        };
        if let Some(earlier) = &carried_over {
            tracing::info!(
                date = %earlier.date,
                close_at = %earlier.resolved_close_at.to_rfc3339(),
                "keeping an earlier day whose close is still pending"
            );
        }

        self.write(&StateFile {
            current: Some(state.clone()),
            carried_over,
        })?;
        tracing::debug!(path = %self.path.display(), date = %state.date, "schedule state saved");
        Ok(())
    }

    /// Applies `update` to the stored state for `date`. `false` when that
    /// day is no longer tracked.
    pub fn update_day<F>(&self, date: NaiveDate, update: F) -> Result<bool, ScheduleError>
    where
        F: FnOnce(&mut ScheduleState),
    {
        let mut file = self.read()?;
        let Some(state) = file.day_mut(date) else {
            return Ok(false);
        };
        update(state);
        self.write(&file)?;
        Ok(true)
    }

    fn read(&self) -> Result<StateFile, ScheduleError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(source) => {
                return Err(ScheduleError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| ScheduleError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the file with write-then-rename.
    fn write(&self, file: &StateFile) -> Result<(), ScheduleError> {
        let write_error = |source| ScheduleError::StateWrite {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(file).map_err(|e| write_error(io::Error::other(e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "schedule_state.json".into());
        let temp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

        let result = File::create(&temp)
            .and_then(|mut file| {
                file.write_all(&json)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&temp, &self.path));

        if let Err(e) = result {
            let _ = fs::remove_file(&temp);
            return Err(write_error(e));
        }
        Ok(())
    }
}
