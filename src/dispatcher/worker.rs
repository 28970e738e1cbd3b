use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};

use crate::error::AgentError;
use crate::models::Envelope;
use crate::store::StateStore;

use super::batch::{split, PendingBatch, Settlement, Submission};
use super::{DeliveryResult, DispatcherConfig, RemoteSink};

// Set to false to silence this module
const ENABLE_LOGS: bool = true;
const LOG_SCOPE: &str = "dispatcher";

use crate::{log_debug, log_error, log_info, log_warn};

pub(crate) enum DispatchCommand {
    Submit(Submission),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct DispatchWorker {
    pub sink: Arc<dyn RemoteSink>,
    pub store: Arc<dyn StateStore>,
    pub config: DispatcherConfig,
}

impl DispatchWorker {
    pub async fn run(self, mut commands: mpsc::Receiver<DispatchCommand>) {
        let mut pending = PendingBatch::default();

        loop {
            let flush_at = pending
                .opened_at()
                .map(|opened| opened + self.config.flush_interval);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(DispatchCommand::Submit(submission)) => {
                        pending.push(submission, Instant::now());
                        if pending.envelope_count() >= self.config.max_batch_size {
                            self.flush(&mut pending).await;
                        }
                    }
                    Some(DispatchCommand::Flush(done)) => {
                        self.flush(&mut pending).await;
                        let _ = done.send(());
                    }
                    Some(DispatchCommand::Shutdown(done)) => {
                        self.flush(&mut pending).await;
                        log_info!("dispatcher drained, shutting down");
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.flush(&mut pending).await;
                        log_info!("all dispatcher handles dropped, shutting down");
                        break;
                    }
                },
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.flush(&mut pending).await;
                }
            }
        }
    }

    async fn flush(&self, pending: &mut PendingBatch) {
        if pending.is_empty() {
            return;
        }
        let envelope_count = pending.envelope_count();
        let (chunks, mut settlements) = split(pending.take(), self.config.max_batch_size);
        log_debug!(
            "flushing {} envelope(s) in {} chunk(s)",
            envelope_count,
            chunks.len()
        );

        for chunk in chunks {
            if chunk
                .owners
                .iter()
                .all(|&owner| settlements[owner].failure.is_some())
            {
                continue;
            }
            if let Err(failure) = self.deliver_with_retry(&chunk.envelopes).await {
                for &owner in &chunk.owners {
                    settlements[owner].failure.get_or_insert_with(|| failure.clone());
                }
            }
        }

        for settlement in settlements {
            self.settle(settlement).await;
        }
    }

    /// Returns the number of attempts on success, or attempts and the last
    /// error once the budget is spent.
    async fn deliver_with_retry(&self, envelopes: &[Envelope]) -> Result<u32, (u32, String)> {
        let policy = &self.config.retry;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.sink.deliver(envelopes).await {
                Ok(()) => {
                    if attempts > 1 {
                        log_info!(
                            "delivered {} envelope(s) after {} attempts",
                            envelopes.len(),
                            attempts
                        );
                    }
                    return Ok(attempts);
                }
                Err(err) if policy.has_attempts_left(attempts) => {
                    let delay = policy.backoff(attempts);
                    log_warn!(
                        "delivery attempt {}/{} failed: {err:#}; retrying in {}ms",
                        attempts,
                        policy.max_attempts,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    let failure = AgentError::TransientDelivery {
                        attempts,
                        message: format!("{err:#}"),
                    };
                    log_error!("dropping batch of {} envelope(s): {}", envelopes.len(), failure);
                    return Err((attempts, failure.to_string()));
                }
            }
        }
    }

    async fn settle(&self, settlement: Settlement) {
        let result = match (settlement.failure, settlement.cursor) {
            (Some((attempts, reason)), _) => DeliveryResult::Dropped { attempts, reason },
            (None, None) => DeliveryResult::Delivered { commit: None },
            (None, Some(cursor)) => {
                match self
                    .store
                    .commit_watermark(cursor.source, cursor.since, cursor.new_watermark)
                    .await
                {
                    Ok(commit) => {
                        if commit.is_gap() {
                            log_warn!(
                                "{} watermark at {} is behind delivered range starting {}; not committed",
                                cursor.source,
                                commit.value(),
                                cursor.since
                            );
                        } else {
                            log_debug!("{} watermark now {}", cursor.source, commit.value());
                        }
                        DeliveryResult::Delivered {
                            commit: Some(commit),
                        }
                    }
                    Err(err) => {
                        log_error!("failed to commit {} watermark: {err:#}", cursor.source);
                        DeliveryResult::Delivered { commit: None }
                    }
                }
            }
        };

        // The monitor may have stopped; the result is still final.
        let _ = settlement.reply.send(result);
    }
}
