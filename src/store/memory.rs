use std::{collections::HashMap, sync::Mutex, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{decide_commit, StateStore, WatermarkCommit};
use crate::models::Source;

/// Process-local state store. Nothing survives a restart; meant for tests and
/// for embedders that persist state elsewhere.
#[derive(Default)]
pub struct MemoryStateStore {
    watermarks: Mutex<HashMap<Source, i64>>,
    intervals: Mutex<HashMap<Source, Duration>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a watermark, as if a previous run had committed it.
    pub fn with_watermark(self, source: Source, value: i64) -> Self {
        if let Ok(mut guard) = self.watermarks.lock() {
            guard.insert(source, value);
        }
        self
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_watermark(&self, source: Source, now_ms: i64) -> Result<i64> {
        let mut guard = self
            .watermarks
            .lock()
            .map_err(|_| anyhow!("watermark map poisoned"))?;
        Ok(*guard.entry(source).or_insert(now_ms))
    }

    async fn watermark(&self, source: Source) -> Result<Option<i64>> {
        let guard = self
            .watermarks
            .lock()
            .map_err(|_| anyhow!("watermark map poisoned"))?;
        Ok(guard.get(&source).copied())
    }

    async fn commit_watermark(
        &self,
        source: Source,
        since: i64,
        proposed: i64,
    ) -> Result<WatermarkCommit> {
        let mut guard = self
            .watermarks
            .lock()
            .map_err(|_| anyhow!("watermark map poisoned"))?;
        let current = *guard.entry(source).or_insert(since);
        let outcome = decide_commit(current, since, proposed);
        if let WatermarkCommit::Advanced(value) = outcome {
            guard.insert(source, value);
        }
        Ok(outcome)
    }

    async fn load_interval(&self, source: Source) -> Result<Option<Duration>> {
        let guard = self
            .intervals
            .lock()
            .map_err(|_| anyhow!("interval map poisoned"))?;
        Ok(guard.get(&source).copied())
    }

    async fn save_interval(&self, source: Source, interval: Duration) -> Result<()> {
        let mut guard = self
            .intervals
            .lock()
            .map_err(|_| anyhow!("interval map poisoned"))?;
        guard.insert(source, interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_load_initializes_to_now() {
        let store = MemoryStateStore::new();
        assert_eq!(store.watermark(Source::Call).await.unwrap(), None);
        assert_eq!(store.load_watermark(Source::Call, 5_000).await.unwrap(), 5_000);
        // Later loads keep the initial value.
        assert_eq!(store.load_watermark(Source::Call, 9_000).await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn test_commit_only_moves_forward() {
        let store = MemoryStateStore::new().with_watermark(Source::Message, 1_000);

        let outcome = store.commit_watermark(Source::Message, 1_000, 1_010).await.unwrap();
        assert_eq!(outcome, WatermarkCommit::Advanced(1_010));

        let outcome = store.commit_watermark(Source::Message, 1_000, 1_005).await.unwrap();
        assert_eq!(outcome, WatermarkCommit::AlreadyCurrent(1_010));
        assert_eq!(store.watermark(Source::Message).await.unwrap(), Some(1_010));
    }

    #[tokio::test]
    async fn test_commit_refuses_gap() {
        let store = MemoryStateStore::new().with_watermark(Source::Message, 1_000);
        let outcome = store.commit_watermark(Source::Message, 1_010, 1_020).await.unwrap();
        assert!(outcome.is_gap());
        assert_eq!(store.watermark(Source::Message).await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn test_interval_overrides() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load_interval(Source::AppUsage).await.unwrap(), None);
        store
            .save_interval(Source::AppUsage, Duration::from_millis(60_000))
            .await
            .unwrap();
        assert_eq!(
            store.load_interval(Source::AppUsage).await.unwrap(),
            Some(Duration::from_millis(60_000))
        );
    }
}
