//! Loading and validating the automation file written by the control surfaces.

use std::io;
use std::path::Path;

use chrono::NaiveTime;
use chrono_tz::Tz;
use coopdoor_api::pulse::MAX_PERCENT;
use serde::{Deserialize, Serialize};

use crate::errors::ScheduleError;

const OFFSET_LIMIT_MIN: i64 = 180;
const TIMEZONE_FILE: &str = "/etc/timezone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Fixed,
    Solar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleMode {
    Fixed {
        open: NaiveTime,
        close: NaiveTime,
    },
    Solar {
        latitude: f64,
        longitude: f64,
        sunrise_offset_min: i32,
        sunset_offset_min: i32,
    },
}

/// A validated snapshot of the automation file. Exactly one mode is selected.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub mode: ScheduleMode,
    pub timezone: Tz,
    /// 0 means no cap
    pub open_percent_cap: u8,
}

impl ScheduleConfig {
    pub fn kind(&self) -> ModeKind {
        match self.mode {
            ScheduleMode::Fixed { .. } => ModeKind::Fixed,
            ScheduleMode::Solar { .. } => ModeKind::Solar,
        }
    }

    /// Percentage passed to the scheduled open.
    pub fn open_percent(&self) -> u8 {
        if self.open_percent_cap == 0 {
            MAX_PERCENT
        } else {
            self.open_percent_cap.min(MAX_PERCENT)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AutomationFile {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fixed: Option<FixedSection>,
    #[serde(default)]
    solar: Option<SolarSection>,
    #[serde(default)]
    location: Option<LocationSection>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    open_percent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FixedSection {
    open: String,
    close: String,
}

#[derive(Debug, Default, Deserialize)]
struct SolarSection {
    #[serde(default)]
    sunrise_offset_min: i64,
    #[serde(default)]
    sunset_offset_min: i64,
}

#[derive(Debug, Deserialize)]
struct LocationSection {
    lat: f64,
    lon: f64,
}

pub fn load_automation(path: &Path) -> Result<ScheduleConfig, ScheduleError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScheduleError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_automation(&text).map_err(|e| match e {
        ParseFailure::Json(source) => ScheduleError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Schedule(e) => e,
    })
}

#[derive(Debug)]
pub enum ParseFailure {
    Json(serde_json::Error),
    Schedule(ScheduleError),
}

impl From<ScheduleError> for ParseFailure {
    fn from(e: ScheduleError) -> Self {
        ParseFailure::Schedule(e)
    }
}

pub fn parse_automation(text: &str) -> Result<ScheduleConfig, ParseFailure> {
    let file: AutomationFile = serde_json::from_str(text).map_err(ParseFailure::Json)?;

    let selected = match file.mode.as_deref() {
        Some("fixed") => ModeKind::Fixed,
        Some("solar") => ModeKind::Solar,
        Some(other) => {
            return Err(ScheduleError::InvalidArgument(format!(
                "mode must be \"fixed\" or \"solar\", got {other:?}"
            ))
            .into());
        }
        None => match (&file.fixed, &file.location) {
            (Some(_), None) => ModeKind::Fixed,
            (None, Some(_)) => ModeKind::Solar,
            (Some(_), Some(_)) => {
                return Err(ScheduleError::ConfigInconsistent(
                    "both fixed times and a solar location are configured but no mode selects one"
                        .into(),
                )
                .into());
            }
            (None, None) => {
                return Err(ScheduleError::ConfigInconsistent(
                    "neither fixed times nor a solar location are configured".into(),
                )
                .into());
            }
        },
    };

    let mode = match selected {
        ModeKind::Fixed => {
            let fixed = file.fixed.as_ref().ok_or_else(|| {
                ScheduleError::ConfigInconsistent("mode is fixed but no fixed times are set".into())
            })?;
            ScheduleMode::Fixed {
                open: parse_hhmm("fixed.open", &fixed.open)?,
                close: parse_hhmm("fixed.close", &fixed.close)?,
            }
        }
        ModeKind::Solar => {
            let location = file.location.as_ref().ok_or_else(|| {
                ScheduleError::ConfigInconsistent("mode is solar but no location is set".into())
            })?;
            let offsets = file.solar.unwrap_or_default();
            validate_location(location)?;

            ScheduleMode::Solar {
                latitude: location.lat,
                longitude: location.lon,
                sunrise_offset_min: validate_offset("solar.sunrise_offset_min", offsets.sunrise_offset_min)?,
                sunset_offset_min: validate_offset("solar.sunset_offset_min", offsets.sunset_offset_min)?,
            }
        }
    };

    let timezone = match file.timezone.as_deref() {
        Some(name) => name.parse::<Tz>().map_err(|_| {
            ScheduleError::InvalidArgument(format!("unknown timezone {name:?}"))
        })?,
        None => system_timezone(),
    };

    let open_percent_cap = match file.open_percent {
        None => 0,
        Some(p) if (0..=i64::from(MAX_PERCENT)).contains(&p) => p as u8,
        Some(p) => {
            return Err(ScheduleError::InvalidArgument(format!(
                "open_percent must be within 0..=100, got {p}"
            ))
            .into());
        }
    };

    Ok(ScheduleConfig {
        mode,
        timezone,
        open_percent_cap,
    })
}

fn parse_hhmm(field: &str, value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidArgument(format!("{field} must be HH:MM, got {value:?}")))
}

fn validate_offset(field: &str, minutes: i64) -> Result<i32, ScheduleError> {
    if (-OFFSET_LIMIT_MIN..=OFFSET_LIMIT_MIN).contains(&minutes) {
        Ok(minutes as i32)
    } else {
        Err(ScheduleError::InvalidArgument(format!(
            "{field} must be within -{OFFSET_LIMIT_MIN}..={OFFSET_LIMIT_MIN}, got {minutes}"
        )))
    }
}

fn validate_location(location: &LocationSection) -> Result<(), ScheduleError> {
    if !location.lat.is_finite() || !(-90.0..=90.0).contains(&location.lat) {
        return Err(ScheduleError::InvalidArgument(format!(
            "location.lat out of range: {}",
            location.lat
        )));
    }
    if !location.lon.is_finite() || !(-180.0..=180.0).contains(&location.lon) {
        return Err(ScheduleError::InvalidArgument(format!(
            "location.lon out of range: {}",
            location.lon
        )));
    }
    Ok(())
}

/// Host timezone from /etc/timezone, falling back to UTC.
pub fn system_timezone() -> Tz {
    match std::fs::read_to_string(TIMEZONE_FILE) {
        Ok(name) => name.trim().parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(name = name.trim(), "unknown host timezone, using UTC");
            Tz::UTC
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Tz::UTC,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read host timezone, using UTC");
            Tz::UTC
        }
    }
}
