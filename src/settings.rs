//! Agent configuration, persisted as a JSON document.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Source;
use crate::sources::location::LocationPriority;

pub const CONFIG_PATH_ENV: &str = "TELEMETRY_AGENT_CONFIG";
pub const DEBUG_ENV: &str = "TELEMETRY_AGENT_DEBUG";
const DEFAULT_CONFIG_FILE: &str = "telemetry-agent.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectorSettings {
    /// Base URL of the fleet collector, e.g. `https://collector.example.com/api`.
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
    /// How often pending directives are fetched from the collector.
    pub command_poll_interval_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".into(),
            auth_token: None,
            request_timeout_ms: 15_000,
            command_poll_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IntervalSettings {
    pub location_ms: u64,
    pub messages_ms: u64,
    pub calls_ms: u64,
    pub app_usage_ms: u64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            location_ms: Source::Location.default_interval().as_millis() as u64,
            messages_ms: Source::Message.default_interval().as_millis() as u64,
            calls_ms: Source::Call.default_interval().as_millis() as u64,
            app_usage_ms: Source::AppUsage.default_interval().as_millis() as u64,
        }
    }
}

impl IntervalSettings {
    pub fn for_source(&self, source: Source) -> Duration {
        let ms = match source {
            Source::Location => self.location_ms,
            Source::Message => self.messages_ms,
            Source::Call => self.calls_ms,
            Source::AppUsage => self.app_usage_ms,
        };
        if ms == 0 {
            source.default_interval()
        } else {
            Duration::from_millis(ms)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LocationSettings {
    /// Accuracy requested from the platform. The spacing between fixes is
    /// `intervals.locationMs`.
    pub priority: LocationPriority,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            priority: LocationPriority::HighAccuracy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatchSettings {
    pub max_batch_size: usize,
    pub flush_interval_ms: u64,
    /// Total delivery attempts per batch, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub queue_capacity: usize,
    pub drain_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            flush_interval_ms: 5_000,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
            queue_capacity: 256,
            drain_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub device_id: String,
    pub collector: CollectorSettings,
    /// Agent state (watermarks, interval overrides). Relative paths resolve
    /// against the config file's directory.
    pub state_database: PathBuf,
    /// SQLite export written by the platform shim. Without it no log source
    /// is registered.
    pub provider_database: Option<PathBuf>,
    pub intervals: IntervalSettings,
    pub location: LocationSettings,
    pub dispatch: DispatchSettings,
    pub poll_timeout_ms: u64,
    pub enabled_sources: Vec<Source>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            collector: CollectorSettings::default(),
            state_database: PathBuf::from("telemetry-agent.sqlite3"),
            provider_database: None,
            intervals: IntervalSettings::default(),
            location: LocationSettings::default(),
            dispatch: DispatchSettings::default(),
            poll_timeout_ms: 30_000,
            enabled_sources: Source::ALL.to_vec(),
        }
    }
}

impl AgentConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn is_enabled(&self, source: Source) -> bool {
        self.enabled_sources.contains(&source)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.state_database.is_relative() {
            self.state_database = base.join(&self.state_database);
        }
        if let Some(provider) = self.provider_database.as_mut() {
            if provider.is_relative() {
                *provider = base.join(&*provider);
            }
        }
    }
}

/// Whether `TELEMETRY_AGENT_DEBUG` asks for verbose logging.
pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<AgentConfig>,
}

impl ConfigStore {
    /// Loads the config file, creating it with defaults and a fresh device id
    /// when it does not exist yet.
    pub fn load_or_create(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<AgentConfig>(&contents)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        } else {
            AgentConfig::default()
        };

        let needs_write = !path.exists() || data.device_id.is_empty();
        if data.device_id.is_empty() {
            data.device_id = Uuid::new_v4().to_string();
        }

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        if needs_write {
            store.persist(&store.get()?)?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<AgentConfig> {
        self.data
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("config lock poisoned"))
    }

    /// Config with relative paths resolved against the config file location.
    pub fn resolved(&self) -> Result<AgentConfig> {
        let mut config = self.get()?;
        let base = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.resolve_paths(&base);
        Ok(config)
    }

    pub fn update<F>(&self, apply: F) -> Result<AgentConfig>
    where
        F: FnOnce(&mut AgentConfig),
    {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("config lock poisoned"))?;
        apply(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &AgentConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_default_file_with_device_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");

        let store = ConfigStore::load_or_create(path.clone()).unwrap();
        let config = store.get().unwrap();
        assert!(!config.device_id.is_empty());
        assert!(path.exists());

        // A second load keeps the generated id.
        let reloaded = ConfigStore::load_or_create(path).unwrap().get().unwrap();
        assert_eq!(reloaded.device_id, config.device_id);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(
            &path,
            r#"{"deviceId":"dev-7","dispatch":{"maxBatchSize":10},"enabledSources":["calls"]}"#,
        )
        .unwrap();

        let config = ConfigStore::load_or_create(path).unwrap().get().unwrap();
        assert_eq!(config.device_id, "dev-7");
        assert_eq!(config.dispatch.max_batch_size, 10);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.enabled_sources, vec![Source::Call]);
        assert!(config.is_enabled(Source::Call));
        assert!(!config.is_enabled(Source::Message));
    }

    #[test]
    fn test_resolved_paths_are_relative_to_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        let store = ConfigStore::load_or_create(path).unwrap();
        store
            .update(|config| config.provider_database = Some(PathBuf::from("export.db")))
            .unwrap();

        let resolved = store.resolved().unwrap();
        assert_eq!(resolved.state_database, dir.path().join("telemetry-agent.sqlite3"));
        assert_eq!(resolved.provider_database, Some(dir.path().join("export.db")));
    }

    #[test]
    fn test_interval_defaults_per_source() {
        let intervals = IntervalSettings::default();
        assert_eq!(intervals.for_source(Source::AppUsage), Duration::from_secs(300));
        let zeroed = IntervalSettings {
            calls_ms: 0,
            ..IntervalSettings::default()
        };
        assert_eq!(zeroed.for_source(Source::Call), Duration::from_secs(30));
    }
}
