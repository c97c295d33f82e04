//! The once-a-day run: resolve, install, record.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::configs::load_automation;
use crate::errors::ScheduleError;
use crate::installer::{InstallReport, RecurringReport, SystemCtl, TriggerInstaller};
use crate::resolver::{ResolvedSchedule, resolve};
use crate::store::{ScheduleState, ScheduleStateStore};

#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub recurring: RecurringReport,
    pub installed: InstallReport,
    pub state: ScheduleState,
}

/// Installs the recurring triggers, then the day's open/close pair.
///
/// The recurring triggers are installed first and independently, so a bad
/// automation file or an unresolvable date still leaves the safety close in
/// place. Without `date` the current date in the configured timezone is used.
pub fn apply<C: SystemCtl>(
    installer: &TriggerInstaller<C>,
    store: &ScheduleStateStore,
    automation_path: &Path,
    date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<ApplyReport, ScheduleError> {
    let recurring = installer.ensure_recurring();
    if let Err(e) = &recurring {
        tracing::error!(error = %e, "failed to install the recurring triggers");
    }

    let day = apply_day(installer, store, automation_path, date, now);
    if let Err(e) = &day {
        tracing::error!(
            error = %e,
            kind = %e.kind(),
            "today's schedule was not installed, only the safety close will run"
        );
    }

    let (installed, state) = day?;
    Ok(ApplyReport {
        recurring: recurring?,
        installed,
        state,
    })
}

fn apply_day<C: SystemCtl>(
    installer: &TriggerInstaller<C>,
    store: &ScheduleStateStore,
    automation_path: &Path,
    date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<(InstallReport, ScheduleState), ScheduleError> {
    let schedule = preview(automation_path, date, now)?;

    let installed = installer.install_day(&schedule, now)?;
    let mut state = ScheduleState::new(&schedule, &installed, now);
    // re-applying a day must not let its actions fire twice
    let previous = store.load_day(schedule.date).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "cannot read the stored schedule, fired flags start over");
        None
    });
    if let Some(previous) = previous {
        state.open_fired = previous.open_fired;
        state.close_fired = previous.close_fired;
    }
    store.save(&state)?;

    tracing::info!(
        date = %state.date,
        mode = ?state.mode,
        open_at = %state.resolved_open_at.to_rfc3339(),
        close_at = %state.resolved_close_at.to_rfc3339(),
        open_armed = state.open_armed,
        close_armed = state.close_armed,
        "schedule applied"
    );
    Ok((installed, state))
}

/// Resolves the schedule `apply` would install, without touching anything.
pub fn preview(
    automation_path: &Path,
    date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<ResolvedSchedule, ScheduleError> {
    let config = load_automation(automation_path)?;
    let date = date.unwrap_or_else(|| now.with_timezone(&config.timezone).date_naive());
    resolve(&config, date)
}
