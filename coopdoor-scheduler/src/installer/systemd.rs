use std::fmt::Write as _;
use std::process::Command;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::ScheduleError;

/// `OnCalendar=` format of the one-shot timers.
pub(crate) const ONE_SHOT_CALENDAR: &str = "%Y-%m-%d %H:%M:%S UTC";

/// The instant a one-shot timer written by [`TimerUnit::render`] fires at.
pub(crate) fn one_shot_instant(timer_text: &str) -> Option<DateTime<Utc>> {
    let value = timer_text
        .lines()
        .find_map(|line| line.strip_prefix("OnCalendar="))?;
    NaiveDateTime::parse_from_str(value.trim(), ONE_SHOT_CALENDAR)
        .ok()
        .map(|at| at.and_utc())
}

/// The systemctl invocations the installer needs.
pub trait SystemCtl {
    fn run(&self, args: &[&str]) -> Result<(), ScheduleError>;
}

impl<C: SystemCtl + ?Sized> SystemCtl for &C {
    fn run(&self, args: &[&str]) -> Result<(), ScheduleError> {
        (**self).run(args)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSystemCtl {
    program: String,
}

impl ProcessSystemCtl {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SystemCtl for ProcessSystemCtl {
    fn run(&self, args: &[&str]) -> Result<(), ScheduleError> {
        tracing::debug!(program = %self.program, args = %args.join(" "), "running systemctl");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| ScheduleError::SystemCtl {
                args: args.join(" "),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ScheduleError::SystemCtl {
                args: args.join(" "),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

pub(crate) struct TimerUnit<'a> {
    pub description: &'a str,
    pub on_calendar: &'a str,
    pub service: &'a str,
}

impl TimerUnit<'_> {
    pub fn render(&self) -> String {
        format!(
            "[Unit]\n\
             Description={}\n\
             \n\
             [Timer]\n\
             OnCalendar={}\n\
             Persistent=true\n\
             AccuracySec=1s\n\
             Unit={}\n\
             \n\
             [Install]\n\
             WantedBy=timers.target\n",
            self.description, self.on_calendar, self.service
        )
    }
}

pub(crate) struct ServiceUnit<'a> {
    pub description: &'a str,
    pub exec_start: &'a str,
    pub user: Option<&'a str>,
    pub after: Option<&'a str>,
    pub environment: &'a [(String, String)],
}

impl ServiceUnit<'_> {
    pub fn render(&self) -> String {
        let mut unit = String::new();
        let _ = writeln!(unit, "[Unit]");
        let _ = writeln!(unit, "Description={}", self.description);
        if let Some(after) = self.after {
            let _ = writeln!(unit, "Wants={after}");
            let _ = writeln!(unit, "After={after}");
        }
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Service]");
        let _ = writeln!(unit, "Type=oneshot");
        if let Some(user) = self.user {
            let _ = writeln!(unit, "User={user}");
        }
        for (key, value) in self.environment {
            let _ = writeln!(unit, "Environment={key}={value}");
        }
        let _ = writeln!(unit, "ExecStart={}", self.exec_start);
        unit
    }
}
