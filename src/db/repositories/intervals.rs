use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    helpers::{duration_to_ms, ms_to_duration},
    Database,
};
use crate::models::Source;

/// Interval overrides received through the command channel.
pub struct IntervalRepository<'a> {
    conn: &'a Connection,
}

impl<'a> IntervalRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, source: Source) -> Result<Option<Duration>> {
        let stored: Option<i64> = self
            .conn
            .query_row(
                "SELECT interval_ms FROM interval_overrides WHERE source = ?1",
                params![source.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        stored
            .map(|ms| ms_to_duration(ms, "interval_ms"))
            .transpose()
    }

    pub fn upsert(&self, source: Source, interval: Duration) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO interval_overrides (source, interval_ms, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(source) DO UPDATE SET
                     interval_ms = excluded.interval_ms,
                     updated_at = excluded.updated_at",
                params![
                    source.as_str(),
                    duration_to_ms(interval)?,
                    Utc::now().to_rfc3339()
                ],
            )
            .with_context(|| format!("failed to store {source} interval override"))?;
        Ok(())
    }
}

impl Database {
    pub async fn get_interval_override(&self, source: Source) -> Result<Option<Duration>> {
        self.execute(move |conn| IntervalRepository::new(conn).get(source))
            .await
    }

    pub async fn set_interval_override(&self, source: Source, interval: Duration) -> Result<()> {
        self.execute(move |conn| IntervalRepository::new(conn).upsert(source, interval))
            .await
    }
}
