//! Reads the SQLite database the platform shim exports and exposes it through
//! the provider, lookup and location interfaces.

mod location;
mod logs;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::models::Source;
use crate::sources::{AppCatalog, AppInfo, ContactDirectory, Lookups};

pub use location::ExportLocationFeed;
pub use logs::{CallLog, MessageLog, UsageLog};

/// Schema the shim is expected to write.
pub const EXPORT_SCHEMA: &str = include_str!("export_schema.sql");

/// Contact names and app metadata for the identifiers seen in recent
/// batches. Filled on the blocking pool while a batch is read, so lookups
/// during normalization never touch SQLite.
#[derive(Default)]
struct LookupCache {
    contacts: RwLock<HashMap<String, Option<String>>>,
    apps: RwLock<HashMap<String, Option<AppInfo>>>,
}

impl LookupCache {
    /// Re-reads the display name of every number in `numbers`.
    fn refresh_contacts<'a>(&self, conn: &Connection, numbers: impl IntoIterator<Item = &'a str>) {
        if let Err(err) = self.load_contacts(conn, numbers) {
            warn!("contact lookup failed: {err:#}");
        }
    }

    fn load_contacts<'a>(
        &self,
        conn: &Connection,
        numbers: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let mut stmt = conn.prepare_cached("SELECT display_name FROM contacts WHERE number = ?1")?;
        let mut found = HashMap::new();
        for number in numbers.into_iter().filter(|number| !number.is_empty()) {
            if found.contains_key(number) {
                continue;
            }
            let name: Option<String> = stmt
                .query_row(params![number], |row| row.get(0))
                .optional()?;
            found.insert(number.to_string(), name);
        }

        self.contacts
            .write()
            .map_err(|_| anyhow!("contact cache poisoned"))?
            .extend(found);
        Ok(())
    }

    /// Re-reads the catalog entry of every package in `packages`.
    fn refresh_apps<'a>(&self, conn: &Connection, packages: impl IntoIterator<Item = &'a str>) {
        if let Err(err) = self.load_apps(conn, packages) {
            warn!("app lookup failed: {err:#}");
        }
    }

    fn load_apps<'a>(&self, conn: &Connection, packages: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT label, category, is_system FROM apps WHERE package_name = ?1",
        )?;
        let mut found = HashMap::new();
        for package in packages {
            if found.contains_key(package) {
                continue;
            }
            let info = stmt
                .query_row(params![package], |row| {
                    Ok(AppInfo {
                        label: row.get(0)?,
                        category: row.get(1)?,
                        is_system: row.get::<_, i64>(2)? != 0,
                    })
                })
                .optional()?;
            found.insert(package.to_string(), info);
        }

        self.apps
            .write()
            .map_err(|_| anyhow!("app cache poisoned"))?
            .extend(found);
        Ok(())
    }
}

/// Shared read handle on the export database.
#[derive(Clone)]
pub struct ExportBridge {
    conn: Arc<Mutex<Connection>>,
    path: Arc<PathBuf>,
    cache: Arc<LookupCache>,
}

impl ExportBridge {
    /// Opens an existing export read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open platform export at {}", path.display()))?;
        info!("Platform export opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Arc::new(path.to_path_buf()),
            cache: Arc::new(LookupCache::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("platform export connection poisoned"))?;
        task(&guard)
    }

    /// Runs `task` on the blocking pool.
    async fn read<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.with_conn(task))
            .await
            .context("platform export worker join failed")?
    }

    pub async fn is_granted(&self, source: Source) -> bool {
        let granted = self
            .read(move |conn| {
                let granted: Option<i64> = conn
                    .query_row(
                        "SELECT granted FROM grants WHERE source = ?1",
                        params![source.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(granted.unwrap_or(0) != 0)
            })
            .await;

        match granted {
            Ok(granted) => granted,
            Err(err) => {
                warn!("could not read {source} grant: {err:#}");
                false
            }
        }
    }

    pub fn message_log(&self) -> MessageLog {
        MessageLog::new(self.clone())
    }

    pub fn call_log(&self) -> CallLog {
        CallLog::new(self.clone())
    }

    pub fn usage_log(&self) -> UsageLog {
        UsageLog::new(self.clone())
    }

    pub fn location_feed(&self) -> ExportLocationFeed {
        ExportLocationFeed::new(self.clone())
    }

    /// Contact and app lookups backed by the export.
    pub fn lookups(&self) -> Lookups {
        Lookups::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }
}

impl ContactDirectory for ExportBridge {
    fn display_name(&self, number: &str) -> Option<String> {
        let contacts = self.cache.contacts.read().ok()?;
        contacts.get(number).cloned().flatten()
    }
}

impl AppCatalog for ExportBridge {
    fn app_info(&self, package: &str) -> Option<AppInfo> {
        let apps = self.cache.apps.read().ok()?;
        apps.get(package).cloned().flatten()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{export, grant};
    use super::*;
    use crate::sources::LogProvider;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_grants_default_to_denied() {
        let export = export();
        assert!(!export.bridge.is_granted(Source::Call).await);
        grant(&export.writer, Source::Call);
        assert!(export.bridge.is_granted(Source::Call).await);
    }

    #[tokio::test]
    async fn test_lookups_resolve_what_batches_have_read() {
        let export = export();
        let writer = &export.writer;
        grant(writer, Source::Call);
        grant(writer, Source::AppUsage);
        writer
            .execute_batch(
                "INSERT INTO contacts (number, display_name) VALUES ('+15550100', 'Dana');
                 INSERT INTO calls (number, type, date, duration) VALUES ('+15550100', 1, 10, 5);
                 INSERT INTO calls (number, type, date, duration) VALUES ('+15550199', 1, 20, 5);
                 INSERT INTO apps (package_name, label, category, is_system)
                     VALUES ('com.android.settings', 'Settings', NULL, 1);
                 INSERT INTO usage_events (package_name, event_type, timestamp)
                     VALUES ('com.android.settings', 1, 30);",
            )
            .unwrap();

        let lookups = export.bridge.lookups();
        assert_eq!(lookups.contact_name("+15550100"), None);

        export.bridge.call_log().query(0).await.unwrap();
        export.bridge.usage_log().query(0).await.unwrap();

        assert_eq!(lookups.contact_name("+15550100").as_deref(), Some("Dana"));
        assert_eq!(lookups.contact_name("+15550199"), None);

        let info = lookups.app_info("com.android.settings").unwrap();
        assert_eq!(info.label, "Settings");
        assert_eq!(info.category, None);
        assert!(info.is_system);

        writer
            .execute(
                "UPDATE contacts SET display_name = 'Dana R' WHERE number = '+15550100'",
                [],
            )
            .unwrap();
        export.bridge.call_log().query(0).await.unwrap();
        assert_eq!(lookups.contact_name("+15550100").as_deref(), Some("Dana R"));
    }

    #[test]
    fn test_open_file_export_read_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.db");
        let writer = Connection::open(&path).unwrap();
        writer.execute_batch(EXPORT_SCHEMA).unwrap();

        let bridge = ExportBridge::open(&path).unwrap();
        assert_eq!(bridge.path(), path.as_path());
        let write = bridge.with_conn(|conn| {
            conn.execute("DELETE FROM contacts", [])
                .map_err(Into::into)
        });
        assert!(write.is_err());
    }
}
