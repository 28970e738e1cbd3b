use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;
use rusqlite::{params, Connection, Row};

use super::ExportBridge;
use crate::models::{CallRecord, MessageFolder, MessageRecord, Source, UsageRecord};
use crate::sources::{LogBatch, LogProvider};

/// Steps through `sql` one row at a time. Column 0 must hold the row's
/// logical time, so a row that fails to decode is still reported by time.
fn decode_rows<R>(
    conn: &Connection,
    sql: &str,
    since: i64,
    decode: impl Fn(&Row<'_>) -> Result<R>,
) -> Result<LogBatch<R>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![since])?;
    let mut batch = LogBatch::default();
    while let Some(row) = rows.next()? {
        match decode(row) {
            Ok(record) => batch.records.push(record),
            Err(err) => match row.get::<_, i64>(0) {
                Ok(at) => batch.unreadable.push((at, format!("{err:#}"))),
                Err(_) => warn!("dropping export row without a readable time: {err:#}"),
            },
        }
    }
    Ok(batch)
}

/// Message metadata exported from the platform message store.
pub struct MessageLog {
    bridge: ExportBridge,
}

impl MessageLog {
    pub fn new(bridge: ExportBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LogProvider for MessageLog {
    type Record = MessageRecord;

    async fn is_authorized(&self) -> bool {
        self.bridge.is_granted(Source::Message).await
    }

    async fn query(&self, since: i64) -> Result<LogBatch<MessageRecord>> {
        let cache = Arc::clone(&self.bridge.cache);
        self.bridge
            .read(move |conn| {
                let batch = decode_rows(
                    conn,
                    "SELECT date, address, type, date_sent, read, status, thread_id
                     FROM sms
                     WHERE date > ?1 AND type IN (1, 2, 3, 4)
                     ORDER BY date ASC, id ASC",
                    since,
                    |row| {
                        let code: i32 = row.get(2)?;
                        let folder = MessageFolder::from_code(code)
                            .ok_or_else(|| anyhow!("unknown message box {code}"))?;
                        Ok(MessageRecord {
                            folder,
                            address: row.get(1)?,
                            date: row.get(0)?,
                            date_sent: row.get(3)?,
                            read: row.get::<_, i64>(4)? != 0,
                            status: row.get(5)?,
                            thread_id: row.get(6)?,
                        })
                    },
                )?;
                cache.refresh_contacts(conn, batch.records.iter().map(|r| r.address.as_str()));
                Ok(batch)
            })
            .await
    }
}

/// Exported call log.
pub struct CallLog {
    bridge: ExportBridge,
}

impl CallLog {
    pub fn new(bridge: ExportBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LogProvider for CallLog {
    type Record = CallRecord;

    async fn is_authorized(&self) -> bool {
        self.bridge.is_granted(Source::Call).await
    }

    async fn query(&self, since: i64) -> Result<LogBatch<CallRecord>> {
        let cache = Arc::clone(&self.bridge.cache);
        self.bridge
            .read(move |conn| {
                let batch = decode_rows(
                    conn,
                    "SELECT date, number, type, duration
                     FROM calls
                     WHERE date > ?1
                     ORDER BY date ASC, id ASC",
                    since,
                    |row| {
                        Ok(CallRecord {
                            date: row.get(0)?,
                            number: row.get(1)?,
                            call_type: row.get(2)?,
                            duration_secs: row.get(3)?,
                        })
                    },
                )?;
                cache.refresh_contacts(conn, batch.records.iter().map(|r| r.number.as_str()));
                Ok(batch)
            })
            .await
    }
}

/// Exported app usage events.
pub struct UsageLog {
    bridge: ExportBridge,
}

impl UsageLog {
    pub fn new(bridge: ExportBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LogProvider for UsageLog {
    type Record = UsageRecord;

    async fn is_authorized(&self) -> bool {
        self.bridge.is_granted(Source::AppUsage).await
    }

    async fn query(&self, since: i64) -> Result<LogBatch<UsageRecord>> {
        let cache = Arc::clone(&self.bridge.cache);
        self.bridge
            .read(move |conn| {
                let batch = decode_rows(
                    conn,
                    "SELECT timestamp, package_name, class_name, event_type, foreground_ms
                     FROM usage_events
                     WHERE timestamp > ?1
                     ORDER BY timestamp ASC, id ASC",
                    since,
                    |row| {
                        Ok(UsageRecord {
                            timestamp: row.get(0)?,
                            package_name: row.get(1)?,
                            class_name: row.get(2)?,
                            event_type: row.get(3)?,
                            foreground_ms: row.get(4)?,
                        })
                    },
                )?;
                cache.refresh_apps(conn, batch.records.iter().map(|r| r.package_name.as_str()));
                Ok(batch)
            })
            .await
    }
}
