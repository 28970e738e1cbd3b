//! Durable per-source state: sync watermarks and interval overrides.

mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Source;

pub use memory::MemoryStateStore;

/// Result of asking the store to move a watermark forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkCommit {
    /// The stored value moved to the proposed one.
    Advanced(i64),
    /// The stored value was already at or past the proposal.
    AlreadyCurrent(i64),
    /// The stored value is behind the range the delivered events started from,
    /// meaning an earlier range was never confirmed. Nothing was written.
    Gap { committed: i64 },
}

impl WatermarkCommit {
    pub fn is_gap(&self) -> bool {
        matches!(self, WatermarkCommit::Gap { .. })
    }

    pub fn value(&self) -> i64 {
        match *self {
            WatermarkCommit::Advanced(value) | WatermarkCommit::AlreadyCurrent(value) => value,
            WatermarkCommit::Gap { committed } => committed,
        }
    }
}

/// Decides a commit against the currently stored value.
pub(crate) fn decide_commit(current: i64, since: i64, proposed: i64) -> WatermarkCommit {
    if current < since {
        WatermarkCommit::Gap { committed: current }
    } else if proposed > current {
        WatermarkCommit::Advanced(proposed)
    } else {
        WatermarkCommit::AlreadyCurrent(current)
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored watermark, initializing it to `now_ms` on first use
    /// so that history predating the agent is never synced.
    async fn load_watermark(&self, source: Source, now_ms: i64) -> Result<i64>;

    /// Returns the stored watermark without initializing it.
    async fn watermark(&self, source: Source) -> Result<Option<i64>>;

    /// Moves the watermark to `proposed` if the stored value is at least
    /// `since`. Never moves it backwards.
    async fn commit_watermark(
        &self,
        source: Source,
        since: i64,
        proposed: i64,
    ) -> Result<WatermarkCommit>;

    async fn load_interval(&self, source: Source) -> Result<Option<Duration>>;

    async fn save_interval(&self, source: Source, interval: Duration) -> Result<()>;
}
