//! Canonical event envelope shared by every source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::Source;

pub type Payload = Map<String, Value>;

/// A normalized record from one of the monitored logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub source: Source,
    /// Logical time from the source log, epoch milliseconds.
    pub occurred_at: i64,
    pub payload: Payload,
    pub dedupe_key: String,
}

impl Event {
    pub fn new(source: Source, occurred_at: i64, dedupe_key: String, payload: Payload) -> Self {
        Self {
            source,
            occurred_at,
            payload,
            dedupe_key,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Reply to a remote directive, delivered through the normal event path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub id: Uuid,
    pub command: String,
    pub status: CommandStatus,
    pub message: String,
    pub command_id: Option<String>,
    pub issued_at: i64,
}

impl CommandResult {
    pub fn success(
        command: impl Into<String>,
        message: impl Into<String>,
        command_id: Option<String>,
        issued_at: i64,
    ) -> Self {
        Self::with_status(command, CommandStatus::Success, message, command_id, issued_at)
    }

    pub fn error(
        command: impl Into<String>,
        message: impl Into<String>,
        command_id: Option<String>,
        issued_at: i64,
    ) -> Self {
        Self::with_status(command, CommandStatus::Error, message, command_id, issued_at)
    }

    fn with_status(
        command: impl Into<String>,
        status: CommandStatus,
        message: impl Into<String>,
        command_id: Option<String>,
        issued_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            status,
            message: message.into(),
            command_id,
            issued_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Unit handed to the remote sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Event(Event),
    CommandResult(CommandResult),
}

impl Envelope {
    pub fn dedupe_key(&self) -> String {
        match self {
            Envelope::Event(event) => event.dedupe_key.clone(),
            Envelope::CommandResult(result) => format!("command_result:{}", result.id),
        }
    }

    pub fn as_command_result(&self) -> Option<&CommandResult> {
        match self {
            Envelope::CommandResult(result) => Some(result),
            Envelope::Event(_) => None,
        }
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        Envelope::Event(event)
    }
}

impl From<CommandResult> for Envelope {
    fn from(result: CommandResult) -> Self {
        Envelope::CommandResult(result)
    }
}
