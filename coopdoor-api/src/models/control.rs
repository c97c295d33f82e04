use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ConnectionState, DoorPosition, DoorSnapshot, EventAction, LastEvent};
use crate::error::ErrorBody;

/// Commands accepted on the daemon's command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Open the door to a percentage, subject to the configured cap
    Open {
        /// Requested opening percentage (0-100); 0 closes the door
        percent: i32,
    },
    /// Close the door fully
    Close,
    /// Report connection state, position and last event
    Status,
    /// Bring the link up without moving the door
    Connect,
    /// Release the link and cancel pending reconnects
    Disconnect,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Open { .. } => "open",
            Command::Close => "close",
            Command::Status => "status",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response and the daemon's log lines
    pub id: Uuid,
    pub command: Command,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
        }
    }
}

/// Result of a command together with the state it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub connection: ConnectionState,
    pub position: Option<DoorPosition>,
    pub last_event: Option<LastEvent>,
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<EventAction>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub eta: Option<OffsetDateTime>,
}

impl CommandOutcome {
    pub fn new(succeeded: bool, snapshot: DoorSnapshot) -> Self {
        let DoorSnapshot {
            connection,
            position,
            last_event,
            busy,
            op,
            eta,
        } = snapshot;

        Self {
            succeeded,
            connection,
            position,
            last_event,
            busy,
            op,
            eta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok(CommandOutcome),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request being answered; nil when the request was unreadable
    pub id: Uuid,
    pub reply: Reply,
}

impl Response {
    pub fn ok(id: Uuid, outcome: CommandOutcome) -> Self {
        Self {
            id,
            reply: Reply::Ok(outcome),
        }
    }

    pub fn error(id: Uuid, body: ErrorBody) -> Self {
        Self {
            id,
            reply: Reply::Error(body),
        }
    }
}
