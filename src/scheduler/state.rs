use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Source;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    #[default]
    Stopped,
    Running,
}

/// Counters a monitor task keeps while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub polls: u64,
    pub events_submitted: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MonitorStats {
    pub fn record_poll(&mut self, events: usize, at: DateTime<Utc>) {
        self.polls += 1;
        self.events_submitted += events as u64;
        self.last_poll_at = Some(at);
        self.last_error = None;
    }

    pub fn record_error(&mut self, message: String, at: DateTime<Utc>) {
        self.polls += 1;
        self.last_poll_at = Some(at);
        self.last_error = Some(message);
    }
}

/// Point-in-time view of one source's monitor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    pub source: Source,
    pub status: MonitorStatus,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub polls: u64,
    pub events_submitted: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MonitorState {
    pub fn stopped(source: Source, interval: Duration) -> Self {
        Self {
            source,
            status: MonitorStatus::Stopped,
            interval,
            started_at: None,
            polls: 0,
            events_submitted: 0,
            last_poll_at: None,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == MonitorStatus::Running
    }

    pub(crate) fn with_stats(mut self, stats: &MonitorStats) -> Self {
        self.polls = stats.polls;
        self.events_submitted = stats.events_submitted;
        self.last_poll_at = stats.last_poll_at;
        self.last_error = stats.last_error.clone();
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
