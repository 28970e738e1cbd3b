//! Raw records as the platform providers hand them over.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageFolder {
    Inbox,
    Sent,
    Draft,
    Outbox,
}

impl MessageFolder {
    /// Label carried in the event payload. Inbox messages are "received".
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFolder::Inbox => "received",
            MessageFolder::Sent => "sent",
            MessageFolder::Draft => "draft",
            MessageFolder::Outbox => "outbox",
        }
    }

    /// Maps the platform's numeric message box (1 inbox, 2 sent, 3 draft, 4 outbox).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(MessageFolder::Inbox),
            2 => Some(MessageFolder::Sent),
            3 => Some(MessageFolder::Draft),
            4 => Some(MessageFolder::Outbox),
            _ => None,
        }
    }
}

/// Message-log metadata. Bodies are intentionally not part of the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub folder: MessageFolder,
    pub address: String,
    pub date: i64,
    pub date_sent: Option<i64>,
    pub read: bool,
    pub status: i32,
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub number: String,
    /// Platform call type code (1 incoming, 2 outgoing, 3 missed, ...).
    pub call_type: i32,
    pub date: i64,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub package_name: String,
    pub class_name: Option<String>,
    /// Platform usage event code (1 foreground, 2 background, ...).
    pub event_type: i32,
    pub timestamp: i64,
    pub foreground_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f32,
    pub altitude: Option<f64>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
    pub provider: String,
    /// Fix time, epoch milliseconds.
    pub time: i64,
}
