//! The remote end of the delivery path.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Envelope, Event, Source};

/// Append-only collector with at-least-once semantics. An `Ok` is the
/// acknowledgement; the sink drops envelopes whose dedupe key it has seen.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn deliver(&self, batch: &[Envelope]) -> Result<()>;
}

#[async_trait]
impl<S: RemoteSink + ?Sized> RemoteSink for Arc<S> {
    async fn deliver(&self, batch: &[Envelope]) -> Result<()> {
        (**self).deliver(batch).await
    }
}

#[derive(Default)]
struct MemorySinkState {
    seen: HashSet<String>,
    stored: Vec<Envelope>,
}

/// In-process sink that dedupes by key. Failures can be scripted.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
    attempts: AtomicU32,
    fail_next: AtomicU32,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every delivery until [`MemorySink::set_failing`] clears it.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Rejects the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of `deliver` calls, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<Envelope> {
        self.state
            .lock()
            .map(|state| state.stored.clone())
            .unwrap_or_default()
    }

    pub fn events(&self, source: Source) -> Vec<Event> {
        self.stored()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Event(event) if event.source == source => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.stored.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RemoteSink for MemorySink {
    async fn deliver(&self, batch: &[Envelope]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            bail!("collector unavailable");
        }
        let scripted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if scripted.is_ok() {
            bail!("collector unavailable");
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        for envelope in batch {
            if state.seen.insert(envelope.dedupe_key()) {
                state.stored.push(envelope.clone());
            }
        }
        Ok(())
    }
}
