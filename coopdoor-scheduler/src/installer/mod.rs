mod systemd;

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::configs::Scheduler;
use crate::errors::ScheduleError;
use crate::resolver::ResolvedSchedule;

use self::systemd::{ONE_SHOT_CALENDAR, ServiceUnit, TimerUnit, one_shot_instant};

pub use self::systemd::{ProcessSystemCtl, SystemCtl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Open,
    Close,
    SafetyClose,
    DailyApply,
}

impl TriggerKind {
    pub fn unit_stem(&self) -> &'static str {
        match self {
            TriggerKind::Open => "coopdoor-open",
            TriggerKind::Close => "coopdoor-close",
            TriggerKind::SafetyClose => "coopdoor-safety-close",
            TriggerKind::DailyApply => "coopdoor-apply",
        }
    }

    pub fn timer_unit(&self) -> String {
        format!("{}.timer", self.unit_stem())
    }

    pub fn service_unit(&self) -> String {
        format!("{}.service", self.unit_stem())
    }

    /// Open and close units carry the day they belong to, so an earlier
    /// day's close survives the next day's apply.
    pub fn dated_timer_unit(&self, date: NaiveDate) -> String {
        format!("{}-{date}.timer", self.unit_stem())
    }

    pub fn dated_service_unit(&self, date: NaiveDate) -> String {
        format!("{}-{date}.service", self.unit_stem())
    }

    /// Day of a file named by [`TriggerKind::dated_timer_unit`].
    fn timer_date(&self, file_name: &str) -> Option<NaiveDate> {
        let date = file_name
            .strip_prefix(self.unit_stem())?
            .strip_prefix('-')?
            .strip_suffix(".timer")?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitChange {
    /// Unit files written and the timer (re)started
    Armed,
    /// Recurring unit already matched what would be written
    Unchanged,
    /// Instant already passed; nothing armed
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub open: UnitChange,
    pub close: UnitChange,
}

impl InstallReport {
    pub fn open_armed(&self) -> bool {
        self.open == UnitChange::Armed
    }

    pub fn close_armed(&self) -> bool {
        self.close == UnitChange::Armed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringReport {
    pub safety_close: UnitChange,
    pub daily_apply: UnitChange,
}

/// Writes systemd timer/service pairs into a unit directory.
pub struct TriggerInstaller<C> {
    unit_dir: PathBuf,
    scheduler_bin: String,
    run_as_user: Option<String>,
    daemon_unit: Option<String>,
    safety_close_at: NaiveTime,
    daily_apply_at: NaiveTime,
    environment: Vec<(String, String)>,
    systemctl: C,
}

impl<C: SystemCtl> TriggerInstaller<C> {
    pub fn new(unit_dir: impl Into<PathBuf>, scheduler_bin: impl Into<String>, systemctl: C) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            scheduler_bin: scheduler_bin.into(),
            run_as_user: None,
            daemon_unit: None,
            safety_close_at: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
            daily_apply_at: NaiveTime::from_hms_opt(3, 30, 0).unwrap_or(NaiveTime::MIN),
            environment: Vec::new(),
            systemctl,
        }
    }

    pub fn from_settings(
        settings: &Scheduler,
        config_dir: &str,
        systemctl: C,
    ) -> Result<Self, ScheduleError> {
        let mut installer = Self::new(&settings.unit_dir, &settings.scheduler_bin, systemctl)
            .with_safety_close_at(parse_clock("safety_close_at", &settings.safety_close_at)?)
            .with_daily_apply_at(parse_clock("daily_apply_at", &settings.daily_apply_at)?)
            .with_environment("COOPDOOR_CONFIG_DIR", config_dir);
        installer.run_as_user = settings.run_as_user.clone();
        installer.daemon_unit = settings.daemon_unit.clone();
        if let Ok(run_mode) = std::env::var("RUN_MODE") {
            installer = installer.with_environment("RUN_MODE", run_mode);
        }
        Ok(installer)
    }

    pub fn with_safety_close_at(mut self, at: NaiveTime) -> Self {
        self.safety_close_at = at;
        self
    }

    pub fn with_daily_apply_at(mut self, at: NaiveTime) -> Self {
        self.daily_apply_at = at;
        self
    }

    pub fn with_run_as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as_user = Some(user.into());
        self
    }

    pub fn with_daemon_unit(mut self, unit: impl Into<String>) -> Self {
        self.daemon_unit = Some(unit.into());
        self
    }

    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    /// Installs the safety close and the daily re-apply timers.
    ///
    /// Both recur at a fixed host-local time and never depend on the
    /// automation config. Files are only rewritten when their content differs.
    pub fn ensure_recurring(&self) -> Result<RecurringReport, ScheduleError> {
        let safety_close = self.ensure_recurring_unit(
            TriggerKind::SafetyClose,
            "Coop door safety close",
            self.safety_close_at,
            &format!("{} fire safety-close", self.scheduler_bin),
            true,
        )?;
        let daily_apply = self.ensure_recurring_unit(
            TriggerKind::DailyApply,
            "Coop door daily schedule apply",
            self.daily_apply_at,
            &format!("{} apply", self.scheduler_bin),
            false,
        )?;

        Ok(RecurringReport {
            safety_close,
            daily_apply,
        })
    }

    fn ensure_recurring_unit(
        &self,
        kind: TriggerKind,
        description: &str,
        at: NaiveTime,
        exec_start: &str,
        talks_to_daemon: bool,
    ) -> Result<UnitChange, ScheduleError> {
        let on_calendar = format!("*-*-* {}", at.format("%H:%M:%S"));
        let service = kind.service_unit();
        let timer_text = TimerUnit {
            description,
            on_calendar: &on_calendar,
            service: &service,
        }
        .render();
        let service_text = self.service_unit(description, exec_start, talks_to_daemon);

        let timer_changed = self.write_if_changed(&kind.timer_unit(), &timer_text)?;
        let service_changed = self.write_if_changed(&service, &service_text)?;
        let timer = kind.timer_unit();

        if timer_changed || service_changed {
            tracing::info!(unit = %timer, on_calendar = %on_calendar, "recurring trigger updated");
            self.systemctl.run(&["daemon-reload"])?;
            self.systemctl.run(&["enable", &timer])?;
            self.systemctl.run(&["restart", &timer])?;
            Ok(UnitChange::Armed)
        } else {
            tracing::debug!(unit = %timer, "recurring trigger unchanged");
            self.systemctl.run(&["enable", "--now", &timer])?;
            Ok(UnitChange::Unchanged)
        }
    }

    /// Installs the day's open and close one-shot timers.
    ///
    /// Both pairs are staged before anything is renamed into place. Any
    /// failure stops and removes what this call wrote, so a day never ends up
    /// with an open trigger and no close trigger. Instants at or before `now`
    /// are not armed and their stale units are removed. Units left by other
    /// days are pruned afterwards, except a close that has yet to fire.
    pub fn install_day(
        &self,
        schedule: &ResolvedSchedule,
        now: DateTime<Utc>,
    ) -> Result<InstallReport, ScheduleError> {
        let date = schedule.date;
        let pairs = [
            (TriggerKind::Open, schedule.open_at.with_timezone(&Utc), "open"),
            (TriggerKind::Close, schedule.close_at.with_timezone(&Utc), "close"),
        ];

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut changes = [UnitChange::Elapsed; 2];
        let mut removed_any = false;

        for (slot, (kind, at, action)) in pairs.iter().enumerate() {
            let timer = kind.dated_timer_unit(date);
            let service = kind.dated_service_unit(date);

            if *at <= now {
                tracing::warn!(unit = %timer, %at, "trigger instant already passed, not arming");
                removed_any |= self.disarm(&timer, &service)?;
                continue;
            }

            let description = format!("Coop door {action} for {date}");
            let on_calendar = at.format(ONE_SHOT_CALENDAR).to_string();
            let timer_text = TimerUnit {
                description: &description,
                on_calendar: &on_calendar,
                service: &service,
            }
            .render();
            let exec_start = format!("{} fire {action} --date {date}", self.scheduler_bin);
            let service_text = self.service_unit(&description, &exec_start, true);

            for (name, text) in [(timer, timer_text), (service, service_text)] {
                match self.stage(&name, &text) {
                    Ok(entry) => staged.push(entry),
                    Err(e) => {
                        discard(&staged);
                        return Err(e);
                    }
                }
            }
            changes[slot] = UnitChange::Armed;
        }

        let mut committed = Vec::new();
        for (temp, target) in &staged {
            if let Err(source) = fs::rename(temp, target) {
                tracing::error!(path = %target.display(), error = %source, "failed to install trigger unit");
                discard(&staged);
                remove_units(&committed);
                return Err(ScheduleError::TriggerInstall {
                    path: target.clone(),
                    source,
                });
            }
            committed.push(target.clone());
        }

        if !committed.is_empty() || removed_any {
            let armed: Vec<String> = pairs
                .iter()
                .zip(changes)
                .filter(|(_, change)| *change == UnitChange::Armed)
                .map(|((kind, _, _), _)| kind.dated_timer_unit(date))
                .collect();

            if let Err(e) = self.activate(&armed) {
                tracing::error!(error = %e, "failed to activate the day's triggers, rolling back");
                self.deactivate(&armed);
                remove_units(&committed);
                if let Err(e) = self.systemctl.run(&["daemon-reload"]) {
                    tracing::warn!(error = %e, "daemon-reload after rollback failed");
                }
                return Err(e);
            }

            for timer in &armed {
                tracing::info!(unit = %timer, %date, "trigger armed");
            }
        }

        self.prune_other_days(date, now);

        Ok(InstallReport {
            open: changes[0],
            close: changes[1],
        })
    }

    fn activate(&self, timers: &[String]) -> Result<(), ScheduleError> {
        self.systemctl.run(&["daemon-reload"])?;
        for timer in timers {
            self.systemctl.run(&["enable", timer])?;
            self.systemctl.run(&["restart", timer])?;
        }
        Ok(())
    }

    /// Stops timers that `activate` may already have started.
    fn deactivate(&self, timers: &[String]) {
        for timer in timers {
            if let Err(e) = self.systemctl.run(&["disable", "--now", timer]) {
                tracing::warn!(unit = %timer, error = %e, "failed to stop trigger during rollback");
            }
        }
    }

    /// Stops a timer and removes its unit files. `false` when none existed.
    fn disarm(&self, timer: &str, service: &str) -> Result<bool, ScheduleError> {
        let timer_path = self.unit_dir.join(timer);
        let service_path = self.unit_dir.join(service);
        if !timer_path.exists() && !service_path.exists() {
            return Ok(false);
        }

        if let Err(e) = self.systemctl.run(&["disable", "--now", timer]) {
            tracing::warn!(unit = %timer, error = %e, "failed to stop stale trigger");
        }
        for path in [timer_path, service_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(ScheduleError::TriggerInstall { path, source }),
            }
        }
        Ok(true)
    }

    /// Removes open and close units of days other than `date`. A close that
    /// has not fired yet is kept; it belongs to a schedule that rolled over.
    fn prune_other_days(&self, date: NaiveDate, now: DateTime<Utc>) {
        let entries = match fs::read_dir(&self.unit_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.unit_dir.display(), error = %e, "cannot list trigger units");
                return;
            }
        };

        let mut pruned = false;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            for kind in [TriggerKind::Open, TriggerKind::Close] {
                let Some(day) = kind.timer_date(&name).filter(|day| *day != date) else {
                    continue;
                };

                if kind == TriggerKind::Close {
                    let pending = fs::read_to_string(entry.path())
                        .ok()
                        .as_deref()
                        .and_then(one_shot_instant)
                        .is_some_and(|at| at > now);
                    if pending {
                        tracing::info!(unit = %name, "keeping an earlier close that has not fired yet");
                        continue;
                    }
                }

                match self.disarm(&name, &kind.dated_service_unit(day)) {
                    Ok(removed) => pruned |= removed,
                    Err(e) => tracing::warn!(unit = %name, error = %e, "failed to prune old trigger"),
                }
            }
        }

        if pruned {
            if let Err(e) = self.systemctl.run(&["daemon-reload"]) {
                tracing::warn!(error = %e, "daemon-reload after pruning failed");
            }
        }
    }

    fn service_unit(&self, description: &str, exec_start: &str, talks_to_daemon: bool) -> String {
        ServiceUnit {
            description,
            exec_start,
            user: self.run_as_user.as_deref().filter(|_| talks_to_daemon),
            after: self.daemon_unit.as_deref().filter(|_| talks_to_daemon),
            environment: &self.environment,
        }
        .render()
    }

    fn stage(&self, name: &str, text: &str) -> Result<(PathBuf, PathBuf), ScheduleError> {
        let target = self.unit_dir.join(name);
        let temp = self.unit_dir.join(format!(".{name}.{}.tmp", std::process::id()));
        fs::write(&temp, text).map_err(|source| {
            tracing::error!(path = %target.display(), error = %source, "failed to stage trigger unit");
            ScheduleError::TriggerInstall {
                path: target.clone(),
                source,
            }
        })?;
        Ok((temp, target))
    }

    fn write_if_changed(&self, name: &str, text: &str) -> Result<bool, ScheduleError> {
        let target = self.unit_dir.join(name);
        if fs::read_to_string(&target).is_ok_and(|current| current == text) {
            return Ok(false);
        }

        let (temp, target) = self.stage(name, text)?;
        fs::rename(&temp, &target).map_err(|source| {
            let _ = fs::remove_file(&temp);
            ScheduleError::TriggerInstall {
                path: target.clone(),
                source,
            }
        })?;
        Ok(true)
    }
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (temp, _) in staged {
        let _ = fs::remove_file(temp);
    }
}

fn remove_units(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to roll back trigger unit");
        }
    }
}

fn parse_clock(field: &str, value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ScheduleError::InvalidArgument(format!("{field} must be HH:MM, got {value:?}")))
}
