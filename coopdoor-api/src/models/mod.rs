mod control;

pub use control::*;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::pulse::{percent_for_pulses, pulses_for};

/// State of the single link between the daemon and the door controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Reconnecting {
        /// Consecutive failed attempts since the last successful connect
        attempt: u32,
        /// Delay before the next attempt
        next_delay_ms: u64,
    },
    Failed {
        reason: String,
    },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed { .. } => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Last known door position. Advisory only: the controller reports nothing back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorPosition {
    /// Open pulses applied from the closed position
    pub pulse_count: u32,
    /// Door opening percentage (0-100)
    pub percent: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DoorPosition {
    pub fn closed(updated_at: OffsetDateTime) -> Self {
        Self {
            pulse_count: 0,
            percent: 0,
            updated_at,
        }
    }

    pub fn at_percent(percent: u8, base_pulses: u32, updated_at: OffsetDateTime) -> Self {
        Self {
            pulse_count: pulses_for(percent, base_pulses),
            percent: percent.min(crate::pulse::MAX_PERCENT),
            updated_at,
        }
    }

    pub fn after_pulses(pulse_count: u32, base_pulses: u32, updated_at: OffsetDateTime) -> Self {
        let pulse_count = pulse_count.min(base_pulses);
        Self {
            pulse_count,
            percent: percent_for_pulses(pulse_count, base_pulses),
            updated_at,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pulse_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Open,
    Close,
    Connect,
    Disconnect,
}

/// Outcome of the most recent command, overwritten by each one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastEvent {
    pub action: EventAction,
    /// Percentage the caller asked for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_percent: Option<u8>,
    /// Percentage actually driven after the open cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_percent: Option<u8>,
    pub succeeded: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub detail: String,
}

/// Everything a status query reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorSnapshot {
    pub connection: ConnectionState,
    pub position: Option<DoorPosition>,
    pub last_event: Option<LastEvent>,
    /// A command is currently being executed
    pub busy: bool,
    /// Door movement in flight, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<EventAction>,
    /// When the movement in flight is expected to finish
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub eta: Option<OffsetDateTime>,
}
