pub mod solar;

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::configs::{ModeKind, ScheduleConfig, ScheduleMode};
use crate::errors::ScheduleError;

/// Concrete open and close instants for one local date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSchedule {
    pub date: NaiveDate,
    pub mode: ModeKind,
    pub timezone: String,
    pub open_at: DateTime<FixedOffset>,
    pub close_at: DateTime<FixedOffset>,
    pub open_percent: u8,
}

/// Resolves the configured schedule for `date` in the configured timezone.
pub fn resolve(config: &ScheduleConfig, date: NaiveDate) -> Result<ResolvedSchedule, ScheduleError> {
    let tz = config.timezone;

    let (open_at, close_at) = match config.mode {
        ScheduleMode::Fixed { open, close } => {
            let open_at = localize(&tz, date.and_time(open), date)?;
            // a close at or before the open time belongs to the next day
            let close_date = if close <= open {
                date.succ_opt().ok_or_else(|| ScheduleError::Unresolvable {
                    date,
                    reason: "date out of range".into(),
                })?
            } else {
                date
            };
            let close_at = localize(&tz, close_date.and_time(close), date)?;
            (open_at, close_at)
        }
        ScheduleMode::Solar {
            latitude,
            longitude,
            sunrise_offset_min,
            sunset_offset_min,
        } => {
            let unresolvable = |reason: String| {
                tracing::error!(%date, latitude, longitude, %reason, "solar schedule unresolvable");
                ScheduleError::UnresolvableSolar {
                    date,
                    latitude,
                    longitude,
                    reason,
                }
            };

            let events = solar::sun_events(date, latitude, longitude, &tz)
                .map_err(|e| unresolvable(e.describe().to_string()))?;
            let open_at = events.sunrise + TimeDelta::minutes(i64::from(sunrise_offset_min));
            let close_at = events.sunset + TimeDelta::minutes(i64::from(sunset_offset_min));

            if close_at <= open_at {
                return Err(unresolvable(format!(
                    "offset close {} is not after offset open {}",
                    close_at.format("%H:%M"),
                    open_at.format("%H:%M")
                )));
            }
            (open_at, close_at)
        }
    };

    Ok(ResolvedSchedule {
        date,
        mode: config.kind(),
        timezone: tz.name().to_string(),
        open_at: open_at.fixed_offset(),
        close_at: close_at.fixed_offset(),
        open_percent: config.open_percent(),
    })
}

/// Maps a local wall-clock time to an instant.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times in a
/// spring-forward gap move one hour later.
fn localize(tz: &Tz, local: NaiveDateTime, date: NaiveDate) -> Result<DateTime<Tz>, ScheduleError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => Ok(instant),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()
            .ok_or_else(|| ScheduleError::Unresolvable {
                date,
                reason: format!("{local} does not exist in {}", tz.name()),
            }),
    }
}
