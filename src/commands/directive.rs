use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::AgentError;
use crate::models::Source;

/// Directive as it arrives from the command transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawDirective {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, alias = "command_id")]
    pub command_id: Option<String>,
    /// Why the transport entry could not be read, if it could not.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl RawDirective {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_command_id(mut self, id: impl Into<String>) -> Self {
        self.command_id = Some(id.into());
        self
    }

    /// Reads one transport entry. An entry that does not have the directive
    /// shape still yields a directive, marked malformed, so it gets a reply.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RawDirective>(value.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
                Self {
                    kind: text("type").unwrap_or_default(),
                    command_id: text("commandId").or_else(|| text("command_id")),
                    malformed: Some(err.to_string()),
                    ..Self::default()
                }
            }
        }
    }

    /// `sync_now`, `Sync-Now` and `sync-now` all name the same directive.
    pub fn normalized_kind(&self) -> String {
        self.kind.trim().to_ascii_lowercase().replace('_', "-")
    }

    fn source_field(&self) -> Option<String> {
        self.source.clone().or_else(|| {
            self.params
                .get("source")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    SyncNow(Source),
    Reconfigure { source: Source, interval: Duration },
    StopAll,
    RestartAgent,
}

impl Directive {
    pub fn name(&self) -> &'static str {
        match self {
            Directive::SyncNow(_) => "sync-now",
            Directive::Reconfigure { .. } => "reconfigure",
            Directive::StopAll => "stop-all",
            Directive::RestartAgent => "restart-agent",
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown command")]
    UnknownCommand(String),

    #[error("malformed directive: {0}")]
    Malformed(String),

    #[error("missing source")]
    MissingSource,

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("missing intervalMs")]
    MissingInterval,

    #[error("invalid intervalMs: {0}")]
    InvalidInterval(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

fn parse_source(raw: &RawDirective) -> Result<Source, CommandError> {
    let value = raw.source_field().ok_or(CommandError::MissingSource)?;
    value
        .parse::<Source>()
        .map_err(|_| CommandError::UnknownSource(value))
}

fn parse_interval(params: &Map<String, Value>) -> Result<Duration, CommandError> {
    let value = params
        .get("intervalMs")
        .or_else(|| params.get("interval_ms"))
        .ok_or(CommandError::MissingInterval)?;

    let millis = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| CommandError::InvalidInterval(value.to_string()))?;

    if millis == 0 {
        return Err(CommandError::InvalidInterval("must be greater than zero".into()));
    }
    Ok(Duration::from_millis(millis))
}

impl TryFrom<&RawDirective> for Directive {
    type Error = CommandError;

    fn try_from(raw: &RawDirective) -> Result<Self, Self::Error> {
        if let Some(reason) = &raw.malformed {
            return Err(CommandError::Malformed(reason.clone()));
        }
        match raw.normalized_kind().as_str() {
            "sync-now" => Ok(Directive::SyncNow(parse_source(raw)?)),
            // Older clients name the log in the command itself.
            "sync-sms" | "sync-messages" => Ok(Directive::SyncNow(Source::Message)),
            "sync-calls" => Ok(Directive::SyncNow(Source::Call)),
            "get-location" => Ok(Directive::SyncNow(Source::Location)),
            "reconfigure" => Ok(Directive::Reconfigure {
                source: parse_source(raw)?,
                interval: parse_interval(&raw.params)?,
            }),
            "stop-all" => Ok(Directive::StopAll),
            "restart-agent" | "restart-service" => Ok(Directive::RestartAgent),
            _ => Err(CommandError::UnknownCommand(raw.kind.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_are_case_and_separator_insensitive() {
        let raw = RawDirective::new("SYNC_NOW").with_source("calls");
        assert_eq!(Directive::try_from(&raw).unwrap(), Directive::SyncNow(Source::Call));

        let raw = RawDirective::new("Stop-All");
        assert_eq!(Directive::try_from(&raw).unwrap(), Directive::StopAll);

        let raw = RawDirective::new("restart_service");
        assert_eq!(Directive::try_from(&raw).unwrap(), Directive::RestartAgent);
    }

    #[test]
    fn test_legacy_aliases_map_to_sync_now() {
        let cases = [
            ("get_location", Source::Location),
            ("sync_sms", Source::Message),
            ("sync-calls", Source::Call),
        ];
        for (kind, source) in cases {
            let directive = Directive::try_from(&RawDirective::new(kind)).unwrap();
            assert_eq!(directive, Directive::SyncNow(source));
            assert_eq!(directive.name(), "sync-now");
        }
    }

    #[test]
    fn test_malformed_entry_still_parses_to_a_directive() {
        let raw = RawDirective::from_value(json!({"source": "calls", "commandId": "c-4"}));
        assert_eq!(raw.command_id.as_deref(), Some("c-4"));
        let err = Directive::try_from(&raw).unwrap_err();
        assert!(err.to_string().starts_with("malformed directive: "), "{err}");

        let raw = RawDirective::from_value(json!({"type": 7}));
        assert!(matches!(
            Directive::try_from(&raw),
            Err(CommandError::Malformed(_))
        ));

        let raw = RawDirective::from_value(json!({"type": "stop-all"}));
        assert_eq!(raw.malformed, None);
        assert_eq!(Directive::try_from(&raw).unwrap(), Directive::StopAll);
    }

    #[test]
    fn test_reconfigure_reads_interval_from_params() {
        let raw = RawDirective::new("reconfigure")
            .with_param("source", json!("app_usage"))
            .with_param("intervalMs", json!(60_000));
        assert_eq!(
            Directive::try_from(&raw).unwrap(),
            Directive::Reconfigure {
                source: Source::AppUsage,
                interval: Duration::from_millis(60_000)
            }
        );

        let raw = RawDirective::new("reconfigure")
            .with_source("calls")
            .with_param("intervalMs", json!("15000"));
        assert!(Directive::try_from(&raw).is_ok());
    }

    #[test]
    fn test_malformed_parameters() {
        let missing = RawDirective::new("sync-now");
        assert!(matches!(
            Directive::try_from(&missing),
            Err(CommandError::MissingSource)
        ));

        let unknown = RawDirective::new("sync-now").with_source("contacts");
        let err = Directive::try_from(&unknown).unwrap_err();
        assert_eq!(err.to_string(), "unknown source 'contacts'");

        let no_interval = RawDirective::new("reconfigure").with_source("calls");
        assert!(matches!(
            Directive::try_from(&no_interval),
            Err(CommandError::MissingInterval)
        ));

        let zero = RawDirective::new("reconfigure")
            .with_source("calls")
            .with_param("intervalMs", json!(0));
        assert!(matches!(
            Directive::try_from(&zero),
            Err(CommandError::InvalidInterval(_))
        ));

        let negative = RawDirective::new("reconfigure")
            .with_source("calls")
            .with_param("intervalMs", json!(-5));
        assert!(matches!(
            Directive::try_from(&negative),
            Err(CommandError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_unknown_directive() {
        let err = Directive::try_from(&RawDirective::new("take-photo")).unwrap_err();
        assert_eq!(err.to_string(), "unknown command");
    }

    #[test]
    fn test_raw_directive_wire_format() {
        let raw: RawDirective = serde_json::from_str(
            r#"{"type":"reconfigure","source":"calls","params":{"intervalMs":5000},"commandId":"c-1"}"#,
        )
        .unwrap();
        assert_eq!(raw.command_id.as_deref(), Some("c-1"));
        assert_eq!(raw.params["intervalMs"], 5000);
    }
}
