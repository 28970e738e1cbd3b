//! Sync dispatcher: batches events, delivers them to the remote sink with
//! retry, and commits watermarks once delivery is confirmed.

mod batch;
mod retry;
mod sink;
mod worker;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::AgentError;
use crate::models::{CommandResult, Envelope, Event, Source};
use crate::settings::DispatchSettings;
use crate::store::{StateStore, WatermarkCommit};

use batch::{Cursor, Submission};
use worker::{DispatchCommand, DispatchWorker};

pub use retry::RetryPolicy;
pub use sink::{MemorySink, RemoteSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for DispatcherConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_batch_size: settings.max_batch_size.max(1),
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            retry: RetryPolicy::from(settings),
            queue_capacity: settings.queue_capacity.max(1),
            drain_timeout: Duration::from_millis(settings.drain_timeout_ms),
        }
    }
}

/// Final outcome of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Every envelope was acknowledged. `commit` is the watermark outcome for
    /// polling submissions; `None` when there was no watermark to commit or
    /// the commit itself failed.
    Delivered { commit: Option<WatermarkCommit> },
    /// Retries were exhausted and the events were discarded.
    Dropped { attempts: u32, reason: String },
}

impl DeliveryResult {
    /// Whether the submitter's cursor is now durable.
    pub fn watermark_committed(&self) -> bool {
        matches!(
            self,
            DeliveryResult::Delivered {
                commit: Some(WatermarkCommit::Advanced(_) | WatermarkCommit::AlreadyCurrent(_))
            }
        )
    }
}

/// Handle on the asynchronous result of a submission.
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryReceipt {
    /// Waits for the submission to be settled.
    pub async fn wait(self) -> Result<DeliveryResult, AgentError> {
        self.rx.await.map_err(|_| AgentError::DispatcherClosed)
    }

    /// Non-blocking check; `Ok(None)` while delivery is still pending.
    pub fn try_result(&mut self) -> Result<Option<DeliveryResult>, AgentError> {
        match self.rx.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(AgentError::DispatcherClosed),
        }
    }
}

#[derive(Clone)]
pub struct SyncDispatcher {
    commands: mpsc::Sender<DispatchCommand>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    drain_timeout: Duration,
}

impl SyncDispatcher {
    /// Spawns the dispatcher task on the current runtime.
    pub fn spawn(
        sink: Arc<dyn RemoteSink>,
        store: Arc<dyn StateStore>,
        config: DispatcherConfig,
    ) -> Self {
        let (commands, rx) = mpsc::channel(config.queue_capacity);
        let drain_timeout = config.drain_timeout;
        let worker = DispatchWorker {
            sink,
            store,
            config,
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            commands,
            worker: Arc::new(Mutex::new(Some(handle))),
            drain_timeout,
        }
    }

    /// Hands events from one poll to the dispatcher. `since` is the watermark
    /// the poll started from; `new_watermark` is committed once every event
    /// is acknowledged and the stored watermark is still at `since` or later.
    pub async fn submit(
        &self,
        source: Source,
        since: i64,
        events: Vec<Event>,
        new_watermark: i64,
    ) -> Result<DeliveryReceipt, AgentError> {
        let cursor = Cursor {
            source,
            since,
            new_watermark,
        };
        self.enqueue(events.into_iter().map(Envelope::from).collect(), Some(cursor))
            .await
    }

    /// Submits events that carry no watermark, such as pushed location fixes.
    pub async fn submit_events(&self, events: Vec<Event>) -> Result<DeliveryReceipt, AgentError> {
        self.enqueue(events.into_iter().map(Envelope::from).collect(), None)
            .await
    }

    pub async fn submit_command_result(
        &self,
        result: CommandResult,
    ) -> Result<DeliveryReceipt, AgentError> {
        self.enqueue(vec![Envelope::from(result)], None).await
    }

    async fn enqueue(
        &self,
        envelopes: Vec<Envelope>,
        cursor: Option<Cursor>,
    ) -> Result<DeliveryReceipt, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DispatchCommand::Submit(Submission {
                envelopes,
                cursor,
                reply,
            }))
            .await
            .map_err(|_| AgentError::DispatcherClosed)?;
        Ok(DeliveryReceipt { rx })
    }

    /// Delivers everything pending now instead of waiting for the timer.
    pub async fn flush(&self) -> Result<(), AgentError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(DispatchCommand::Flush(done))
            .await
            .map_err(|_| AgentError::DispatcherClosed)?;
        rx.await.map_err(|_| AgentError::DispatcherClosed)
    }

    /// Flushes pending work and stops the dispatcher task. Gives up after the
    /// drain timeout; anything still undelivered is dropped.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };

        let (done, rx) = oneshot::channel();
        if self
            .commands
            .send(DispatchCommand::Shutdown(done))
            .await
            .is_err()
        {
            warn!("dispatcher task already stopped");
        }
        drop(rx);

        match tokio::time::timeout(self.drain_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("sync dispatcher stopped");
                Ok(())
            }
            Ok(Err(err)) => {
                error!("sync dispatcher task failed: {err}");
                Err(AgentError::DispatcherClosed)
            }
            Err(_) => {
                warn!(
                    "sync dispatcher did not drain within {}ms; aborting",
                    self.drain_timeout.as_millis()
                );
                handle.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use crate::store::MemoryStateStore;

    fn event(at: i64) -> Event {
        Event::new(Source::Message, at, format!("message:+1:{at}"), Payload::new())
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            max_batch_size: 10,
            flush_interval: Duration::from_millis(200),
            retry: RetryPolicy::new(3, Duration::from_millis(50)),
            queue_capacity: 16,
            drain_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timer_delivers_and_commits() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(MemoryStateStore::new().with_watermark(Source::Message, 1_000));
        let dispatcher = SyncDispatcher::spawn(sink.clone(), store.clone(), config());

        let receipt = dispatcher
            .submit(Source::Message, 1_000, vec![event(1_001), event(1_010)], 1_010)
            .await
            .unwrap();
        let result = receipt.wait().await.unwrap();

        assert_eq!(
            result,
            DeliveryResult::Delivered {
                commit: Some(WatermarkCommit::Advanced(1_010))
            }
        );
        assert!(result.watermark_committed());
        assert_eq!(sink.len(), 2);
        assert_eq!(store.watermark(Source::Message).await.unwrap(), Some(1_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_drop_batch() {
        let sink = Arc::new(MemorySink::failing());
        let store = Arc::new(MemoryStateStore::new().with_watermark(Source::Message, 1_000));
        let dispatcher = SyncDispatcher::spawn(sink.clone(), store.clone(), config());

        let receipt = dispatcher
            .submit(Source::Message, 1_000, vec![event(1_005)], 1_005)
            .await
            .unwrap();
        dispatcher.flush().await.unwrap();

        match receipt.wait().await.unwrap() {
            DeliveryResult::Dropped { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    reason,
                    "delivery failed after 3 attempt(s): collector unavailable"
                );
            }
            other => panic!("expected drop, got {other:?}"),
        }
        assert_eq!(sink.attempts(), 3);
        assert_eq!(store.watermark(Source::Message).await.unwrap(), Some(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_range_after_drop_is_a_gap() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(MemoryStateStore::new().with_watermark(Source::Call, 1_000));
        let dispatcher = SyncDispatcher::spawn(sink.clone(), store.clone(), config());

        // First range fails all three attempts, second one goes through.
        sink.fail_next(3);
        let first = dispatcher
            .submit(Source::Call, 1_000, vec![event(1_005)], 1_005)
            .await
            .unwrap();
        dispatcher.flush().await.unwrap();
        let second = dispatcher
            .submit(Source::Call, 1_005, vec![event(1_007)], 1_007)
            .await
            .unwrap();
        dispatcher.flush().await.unwrap();

        assert!(matches!(first.wait().await.unwrap(), DeliveryResult::Dropped { .. }));
        let second = second.wait().await.unwrap();
        assert_eq!(
            second,
            DeliveryResult::Delivered {
                commit: Some(WatermarkCommit::Gap { committed: 1_000 })
            }
        );
        assert!(!second.watermark_committed());
        assert_eq!(store.watermark(Source::Call).await.unwrap(), Some(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_flushes_without_timer() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut config = config();
        config.max_batch_size = 2;
        config.flush_interval = Duration::from_secs(3600);
        let dispatcher = SyncDispatcher::spawn(sink.clone(), store, config);

        let receipt = dispatcher
            .submit_events(vec![event(1), event(2)])
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), receipt.wait())
            .await
            .expect("batch should flush once full")
            .unwrap();
        assert_eq!(result, DeliveryResult::Delivered { commit: None });
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_and_rejects_new_work() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(MemoryStateStore::new());
        let dispatcher = SyncDispatcher::spawn(sink.clone(), store, config());

        let receipt = dispatcher
            .submit_command_result(CommandResult::success("stop-all", "stopped", None, 1))
            .await
            .unwrap();
        dispatcher.shutdown().await.unwrap();

        assert_eq!(
            receipt.wait().await.unwrap(),
            DeliveryResult::Delivered { commit: None }
        );
        assert_eq!(sink.len(), 1);
        assert!(matches!(
            dispatcher.submit_events(vec![event(3)]).await,
            Err(AgentError::DispatcherClosed)
        ));
    }
}
