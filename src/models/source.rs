use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// One of the on-device logs the agent can monitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Location,
    #[serde(rename = "messages", alias = "message")]
    Message,
    #[serde(rename = "calls", alias = "call")]
    Call,
    AppUsage,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Location,
        Source::Message,
        Source::Call,
        Source::AppUsage,
    ];

    /// Stable key used for persisted state and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Location => "location",
            Source::Message => "messages",
            Source::Call => "calls",
            Source::AppUsage => "app_usage",
        }
    }

    pub fn default_interval(&self) -> Duration {
        match self {
            Source::Location => Duration::from_secs(60),
            Source::Message | Source::Call => Duration::from_secs(30),
            Source::AppUsage => Duration::from_secs(300),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source '{0}'")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "location" | "locations" => Ok(Source::Location),
            "message" | "messages" | "sms" => Ok(Source::Message),
            "call" | "calls" | "call_log" => Ok(Source::Call),
            "app_usage" | "appusage" | "usage" => Ok(Source::AppUsage),
            _ => Err(UnknownSource(value.to_string())),
        }
    }
}
