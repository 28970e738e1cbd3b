//! Operational error taxonomy for the agent core.
//!
//! Infrastructure code (database, bridge, collector) works in `anyhow::Result`;
//! those failures reach callers wrapped in [`AgentError::Storage`].

use thiserror::Error;

use crate::models::Source;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("permission denied for {0} source")]
    PermissionDenied(Source),

    #[error("{0} monitor is not running")]
    NotRunning(Source),

    #[error("no adapter registered for {0} source")]
    NotRegistered(Source),

    #[error("query against {log} log failed: {message}")]
    TransientQuery { log: Source, message: String },

    #[error("delivery failed after {attempts} attempt(s): {message}")]
    TransientDelivery { attempts: u32, message: String },

    #[error("invalid interval for {log}: {message}")]
    InvalidInterval { log: Source, message: String },

    #[error("sync dispatcher is shut down")]
    DispatcherClosed,

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AgentError {
    /// Failures that resolve themselves on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::PermissionDenied(_)
                | AgentError::TransientQuery { .. }
                | AgentError::TransientDelivery { .. }
                | AgentError::Storage(_)
        )
    }
}

/// A single provider record that could not be mapped to an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {log} record: {reason}")]
pub struct MalformedRecord {
    pub log: Source,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(log: Source, reason: impl Into<String>) -> Self {
        Self {
            log,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            AgentError::PermissionDenied(Source::Call).to_string(),
            "permission denied for calls source"
        );
        assert_eq!(
            AgentError::NotRunning(Source::AppUsage).to_string(),
            "app_usage monitor is not running"
        );
        assert_eq!(
            MalformedRecord::new(Source::Message, "missing date").to_string(),
            "malformed messages record: missing date"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::TransientQuery {
            log: Source::Message,
            message: "timeout".into()
        }
        .is_transient());
        assert!(!AgentError::NotRunning(Source::Message).is_transient());
        assert!(!AgentError::DispatcherClosed.is_transient());
    }
}
