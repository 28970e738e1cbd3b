use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{helpers::parse_source, Database};
use crate::models::Source;
use crate::store::{decide_commit, WatermarkCommit};

pub struct WatermarkRepository<'a> {
    conn: &'a Connection,
}

impl<'a> WatermarkRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, source: Source) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT value FROM watermarks WHERE source = ?1",
                params![source.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Inserts `initial` unless a row already exists, then returns the stored value.
    pub fn get_or_init(&self, source: Source, initial: i64) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO watermarks (source, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(source) DO NOTHING",
                params![source.as_str(), initial, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to initialize {source} watermark"))?;

        self.get(source)?
            .with_context(|| format!("{source} watermark missing after initialization"))
    }

    pub fn commit(&self, source: Source, since: i64, proposed: i64) -> Result<WatermarkCommit> {
        let current = self.get_or_init(source, since)?;
        let outcome = decide_commit(current, since, proposed);

        if let WatermarkCommit::Advanced(value) = outcome {
            self.conn
                .execute(
                    "UPDATE watermarks SET value = ?1, updated_at = ?2
                     WHERE source = ?3 AND value < ?1",
                    params![value, Utc::now().to_rfc3339(), source.as_str()],
                )
                .with_context(|| format!("failed to commit {source} watermark"))?;
        }

        Ok(outcome)
    }

    pub fn list(&self) -> Result<Vec<(Source, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, value FROM watermarks ORDER BY source")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source, value)| Ok((parse_source(&source)?, value)))
            .collect()
    }
}

// Database async wrappers for watermark operations
impl Database {
    pub async fn get_watermark(&self, source: Source) -> Result<Option<i64>> {
        self.execute(move |conn| WatermarkRepository::new(conn).get(source))
            .await
    }

    pub async fn get_or_init_watermark(&self, source: Source, initial: i64) -> Result<i64> {
        self.execute(move |conn| WatermarkRepository::new(conn).get_or_init(source, initial))
            .await
    }

    pub async fn commit_watermark(
        &self,
        source: Source,
        since: i64,
        proposed: i64,
    ) -> Result<WatermarkCommit> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let outcome = WatermarkRepository::new(&tx).commit(source, since, proposed)?;
            tx.commit()
                .with_context(|| format!("failed to commit {source} watermark transaction"))?;
            Ok(outcome)
        })
        .await
    }

    pub async fn list_watermarks(&self) -> Result<Vec<(Source, i64)>> {
        self.execute(|conn| WatermarkRepository::new(conn).list())
            .await
    }
}
