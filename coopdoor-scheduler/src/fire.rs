use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use coopdoor_api::CommandOutcome;
use coopdoor_api::client::DoorControl;
use serde::Serialize;

use crate::errors::ScheduleError;
use crate::store::{ScheduleState, ScheduleStateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FireAction {
    Open,
    Close,
    SafetyClose,
}

impl FireAction {
    pub fn name(&self) -> &'static str {
        match self {
            FireAction::Open => "open",
            FireAction::Close => "close",
            FireAction::SafetyClose => "safety_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Send the command; `percent` is set for opens
    Proceed { percent: Option<u8> },
    Skip(String),
}

/// Whether a fired trigger should reach the door.
///
/// Scheduled actions run at most once per stored day and only against the
/// state they were installed with. A late open after the day's close is
/// refused. The safety close always runs.
pub fn decide(
    action: FireAction,
    state: Option<&ScheduleState>,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Decision {
    if action == FireAction::SafetyClose {
        return Decision::Proceed { percent: None };
    }

    let Some(state) = state else {
        return Decision::Skip(format!("no schedule is stored for {date}"));
    };

    if state.date != date {
        return Decision::Skip(format!(
            "stored schedule is for {}, trigger is for {date}",
            state.date
        ));
    }

    match action {
        FireAction::Open if state.open_fired => Decision::Skip("open already fired".into()),
        FireAction::Close if state.close_fired => Decision::Skip("close already fired".into()),
        FireAction::Open if now >= state.resolved_close_at => Decision::Skip(format!(
            "too late to open, the door was due to close at {}",
            state.resolved_close_at.to_rfc3339()
        )),
        FireAction::Open => Decision::Proceed {
            percent: Some(state.open_percent),
        },
        _ => Decision::Proceed { percent: None },
    }
}

#[derive(Debug)]
pub enum FireOutcome {
    Fired(CommandOutcome),
    Skipped(String),
}

/// Runs one trigger against the daemon and records it in the state store.
pub async fn fire<D: DoorControl + ?Sized>(
    door: &D,
    store: &ScheduleStateStore,
    action: FireAction,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<FireOutcome, ScheduleError> {
    let state = if action == FireAction::SafetyClose {
        None
    } else {
        store.load_day(date)?
    };

    let percent = match decide(action, state.as_ref(), date, now) {
        Decision::Proceed { percent } => percent,
        Decision::Skip(reason) => {
            tracing::info!(action = action.name(), %date, %reason, "trigger skipped");
            return Ok(FireOutcome::Skipped(reason));
        }
    };

    tracing::info!(action = action.name(), %date, ?percent, "trigger firing");
    let outcome = match percent {
        Some(percent) => door.open(i32::from(percent)).await?,
        None => door.close().await?,
    };

    if !outcome.succeeded {
        let detail = outcome
            .last_event
            .as_ref()
            .map(|e| e.detail.clone())
            .unwrap_or_default();
        tracing::error!(action = action.name(), %date, %detail, "door command failed");
        return Err(ScheduleError::CommandFailed {
            action: action.name(),
            detail,
        });
    }

    if action != FireAction::SafetyClose {
        mark_fired(store, action, date)?;
    }

    Ok(FireOutcome::Fired(outcome))
}

fn mark_fired(store: &ScheduleStateStore, action: FireAction, date: NaiveDate) -> Result<(), ScheduleError> {
    let marked = store.update_day(date, |state| match action {
        FireAction::Open => state.open_fired = true,
        FireAction::Close => state.close_fired = true,
        FireAction::SafetyClose => {}
    })?;
    // an apply may have dropped the day while the command ran
    if !marked {
        tracing::warn!(action = action.name(), %date, "schedule state no longer tracks this day, not marking");
    }
    Ok(())
}
