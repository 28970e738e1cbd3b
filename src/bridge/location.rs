use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ExportBridge;
use crate::models::{LocationFix, Source};
use crate::sources::{LocationFeed, LocationRequest};

const FIX_COLUMNS: &str =
    "SELECT latitude, longitude, accuracy, altitude, speed, bearing, provider, time FROM locations";

const FIX_BUFFER: usize = 32;

fn fix_from_row(row: &Row<'_>) -> rusqlite::Result<LocationFix> {
    Ok(LocationFix {
        latitude: row.get(0)?,
        longitude: row.get(1)?,
        accuracy_m: row.get::<_, f64>(2)? as f32,
        altitude: row.get(3)?,
        speed: row.get::<_, Option<f64>>(4)?.map(|v| v as f32),
        bearing: row.get::<_, Option<f64>>(5)?.map(|v| v as f32),
        provider: row.get(6)?,
        time: row.get(7)?,
    })
}

fn newest_fix(conn: &Connection) -> Result<Option<LocationFix>> {
    let sql = format!("{FIX_COLUMNS} ORDER BY time DESC, id DESC LIMIT 1");
    Ok(conn.query_row(&sql, [], fix_from_row).optional()?)
}

fn fixes_after(conn: &Connection, after: i64) -> Result<Vec<LocationFix>> {
    let sql = format!("{FIX_COLUMNS} WHERE time > ?1 ORDER BY time ASC, id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let fixes = stmt
        .query_map(params![after], fix_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(fixes)
}

/// Location feed that tails the `locations` table of the export. One
/// subscription at a time; subscribing again replaces the previous one.
pub struct ExportLocationFeed {
    bridge: ExportBridge,
    subscription: Mutex<Option<CancellationToken>>,
}

impl ExportLocationFeed {
    pub fn new(bridge: ExportBridge) -> Self {
        Self {
            bridge,
            subscription: Mutex::new(None),
        }
    }

    fn replace_subscription(&self, next: Option<CancellationToken>) -> Result<()> {
        let mut guard = self
            .subscription
            .lock()
            .map_err(|_| anyhow!("location subscription lock poisoned"))?;
        if let Some(previous) = std::mem::replace(&mut *guard, next) {
            previous.cancel();
        }
        Ok(())
    }
}

async fn tail_fixes(
    bridge: ExportBridge,
    request: LocationRequest,
    mut cursor: i64,
    fixes: mpsc::Sender<LocationFix>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(request.min_interval.max(std::time::Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !bridge.is_granted(Source::Location).await {
                    info!("location grant revoked; closing fix stream");
                    break;
                }

                let after = cursor;
                let batch = match bridge.read(move |conn| fixes_after(conn, after)).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!("location export read failed: {err:#}");
                        continue;
                    }
                };

                for fix in batch {
                    cursor = cursor.max(fix.time);
                    if fixes.send(fix).await.is_err() {
                        debug!("location receiver dropped");
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl LocationFeed for ExportLocationFeed {
    async fn is_authorized(&self) -> bool {
        self.bridge.is_granted(Source::Location).await
    }

    async fn last_known(&self) -> Option<LocationFix> {
        if !self.is_authorized().await {
            return None;
        }
        match self.bridge.read(newest_fix).await {
            Ok(fix) => fix,
            Err(err) => {
                warn!("could not read last known location: {err:#}");
                None
            }
        }
    }

    async fn subscribe(&self, request: LocationRequest) -> Result<mpsc::Receiver<LocationFix>> {
        if !self.is_authorized().await {
            return Err(anyhow!("location access not granted"));
        }

        // Only fixes written after the subscription starts are streamed.
        let cursor = self
            .bridge
            .read(newest_fix)
            .await?
            .map(|fix| fix.time)
            .unwrap_or(0);

        let (tx, rx) = mpsc::channel(FIX_BUFFER);
        let cancel = CancellationToken::new();
        self.replace_subscription(Some(cancel.clone()))?;
        tokio::spawn(tail_fixes(self.bridge.clone(), request, cursor, tx, cancel));
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Err(err) = self.replace_subscription(None) {
            warn!("{err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::{export, grant};
    use super::*;
    use crate::sources::location::LocationPriority;

    fn insert_fix(conn: &Connection, time: i64) {
        conn.execute(
            "INSERT INTO locations (latitude, longitude, accuracy, provider, time)
             VALUES (52.52, 13.405, 8.5, 'fused', ?1)",
            params![time],
        )
        .unwrap();
    }

    fn request() -> LocationRequest {
        LocationRequest::new(Duration::from_millis(20), LocationPriority::Balanced)
    }

    #[tokio::test]
    async fn test_last_known_requires_grant() {
        let export = export();
        insert_fix(&export.writer, 100);
        let feed = export.bridge.location_feed();
        assert!(feed.last_known().await.is_none());
        assert!(feed.subscribe(request()).await.is_err());

        grant(&export.writer, Source::Location);
        insert_fix(&export.writer, 200);
        let fix = feed.last_known().await.unwrap();
        assert_eq!(fix.time, 200);
        assert_eq!(fix.provider, "fused");
        assert_eq!(fix.altitude, None);
    }

    #[tokio::test]
    async fn test_subscription_streams_new_fixes_only() {
        let export = export();
        grant(&export.writer, Source::Location);
        insert_fix(&export.writer, 100);

        let feed = export.bridge.location_feed();
        let mut fixes = feed.subscribe(request()).await.unwrap();
        insert_fix(&export.writer, 150);
        insert_fix(&export.writer, 175);

        let first = tokio::time::timeout(Duration::from_secs(5), fixes.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), fixes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.time, second.time), (150, 175));

        feed.unsubscribe().await;
        let closed = tokio::time::timeout(Duration::from_secs(5), fixes.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_revoked_grant_closes_stream() {
        let export = export();
        grant(&export.writer, Source::Location);
        let feed = export.bridge.location_feed();
        let mut fixes = feed.subscribe(request()).await.unwrap();

        export
            .writer
            .execute("UPDATE grants SET granted = 0 WHERE source = 'location'", [])
            .unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(5), fixes.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }
}
