use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DeliveryReceipt, SyncDispatcher};
use crate::error::AgentError;
use crate::models::{LocationFix, Source};
use crate::sources::{LocationFeed, LocationRequest, Lookups, SourceAdapter, SourceRecord};
use crate::store::StateStore;
use crate::utils::now_ms;

use super::state::MonitorStats;

// Set to false to silence this module
const ENABLE_LOGS: bool = true;
const LOG_SCOPE: &str = "monitor";

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything a monitor task shares with the scheduler.
pub(crate) struct MonitorContext {
    pub store: Arc<dyn StateStore>,
    pub dispatcher: SyncDispatcher,
    pub poll_timeout: Duration,
    pub in_flight: Arc<AtomicBool>,
    pub stats: Arc<Mutex<MonitorStats>>,
    pub cancel: CancellationToken,
}

impl MonitorContext {
    fn record(&self, outcome: &Result<usize, AgentError>) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        match outcome {
            Ok(events) => stats.record_poll(*events, Utc::now()),
            Err(err) => stats.record_error(err.to_string(), Utc::now()),
        }
    }
}

/// Read position of a polling monitor.
///
/// Runs ahead of the durable watermark while deliveries are pending, and
/// falls back to it as soon as one of them is known not to have committed.
#[derive(Default)]
struct PollCursor {
    position: Option<i64>,
    pending: Vec<DeliveryReceipt>,
}

impl PollCursor {
    fn reconcile(&mut self, source: Source) {
        let mut rewind = false;
        self.pending.retain_mut(|receipt| match receipt.try_result() {
            Ok(None) => true,
            Ok(Some(result)) => {
                if !result.watermark_committed() {
                    log_warn!("{} delivery not committed ({:?}); re-reading from stored watermark", source, result);
                    rewind = true;
                }
                false
            }
            Err(_) => {
                rewind = true;
                false
            }
        });
        if rewind {
            self.position = None;
        }
    }

    async fn position(&mut self, source: Source, store: &dyn StateStore) -> Result<i64, AgentError> {
        if let Some(position) = self.position {
            return Ok(position);
        }
        let stored = store.load_watermark(source, now_ms()).await?;
        self.position = Some(stored);
        Ok(stored)
    }
}

/// Drives one polling source: first poll right away, then one per interval.
/// Polls run inline, so a tick that comes due during a poll is skipped.
pub(crate) async fn polling_loop(
    adapter: Arc<dyn SourceAdapter>,
    ctx: MonitorContext,
    mut interval_rx: watch::Receiver<Duration>,
    mut force_rx: mpsc::Receiver<()>,
) {
    let source = adapter.source();
    let mut cursor = PollCursor::default();
    let mut interval = *interval_rx.borrow_and_update();
    let mut scheduled = Instant::now();
    let mut next_tick = scheduled;

    log_info!("{} monitor started (interval {}ms)", source, interval.as_millis());

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                break;
            }
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                interval = *interval_rx.borrow_and_update();
                next_tick = scheduled + interval;
                log_info!("{} interval now {}ms", source, interval.as_millis());
            }
            _ = sleep_until(next_tick) => {
                scheduled = next_tick;
                run_poll(adapter.as_ref(), &ctx, &mut cursor, &mut force_rx).await;

                next_tick = scheduled + interval;
                let now = Instant::now();
                while next_tick <= now {
                    next_tick += interval;
                }
            }
            Some(()) = force_rx.recv() => {
                log_debug!("{} forced sync", source);
                run_poll(adapter.as_ref(), &ctx, &mut cursor, &mut force_rx).await;
            }
        }
    }

    log_info!("{} monitor stopped", source);
}

async fn run_poll(
    adapter: &dyn SourceAdapter,
    ctx: &MonitorContext,
    cursor: &mut PollCursor,
    force_rx: &mut mpsc::Receiver<()>,
) {
    let source = adapter.source();
    ctx.in_flight.store(true, Ordering::SeqCst);
    let started = Instant::now();

    let outcome = poll_once(adapter, ctx, cursor).await;
    match &outcome {
        Ok(0) => {}
        Ok(events) => log_info!(
            "{} poll handed {} event(s) to dispatcher in {}ms",
            source,
            events,
            started.elapsed().as_millis()
        ),
        Err(err) if err.is_transient() => log_warn!("{} poll failed: {}", source, err),
        Err(err) => log_error!("{} poll failed: {}", source, err),
    }
    ctx.record(&outcome);

    // Requests that arrived mid-poll are covered by this one.
    while force_rx.try_recv().is_ok() {}
    ctx.in_flight.store(false, Ordering::SeqCst);
}

async fn poll_once(
    adapter: &dyn SourceAdapter,
    ctx: &MonitorContext,
    cursor: &mut PollCursor,
) -> Result<usize, AgentError> {
    let source = adapter.source();
    cursor.reconcile(source);
    let watermark = cursor.position(source, ctx.store.as_ref()).await?;

    let outcome = timeout(ctx.poll_timeout, adapter.poll(watermark))
        .await
        .map_err(|_| AgentError::TransientQuery {
            log: source,
            message: format!("poll timed out after {}ms", ctx.poll_timeout.as_millis()),
        })??;

    if outcome.is_idle() {
        return Ok(0);
    }

    let count = outcome.events.len();
    let next = outcome.new_watermark;
    let receipt = ctx
        .dispatcher
        .submit(source, outcome.since, outcome.events, next)
        .await?;
    cursor.position = Some(next);
    cursor.pending.push(receipt);
    Ok(count)
}

/// Drives the location subscription. Ends on its own when the platform
/// closes the stream.
pub(crate) async fn location_loop(
    feed: Arc<dyn LocationFeed>,
    ctx: MonitorContext,
    mut request_rx: watch::Receiver<LocationRequest>,
    mut force_rx: mpsc::Receiver<()>,
    last_fix: Arc<Mutex<Option<LocationFix>>>,
) {
    let mut request = *request_rx.borrow_and_update();

    if let Some(fix) = feed.last_known().await {
        emit_fix(fix, &ctx, &last_fix).await;
    }

    let mut fixes = match feed.subscribe(request).await {
        Ok(fixes) => fixes,
        Err(err) => {
            log_error!("location subscription failed: {err:#}");
            ctx.record(&Err(subscription_error(err)));
            return;
        }
    };
    log_info!(
        "location monitor subscribed (every {}ms, {:?})",
        request.min_interval.as_millis(),
        request.priority
    );

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                break;
            }
            changed = request_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                request = *request_rx.borrow_and_update();
                feed.unsubscribe().await;
                match feed.subscribe(request).await {
                    Ok(resubscribed) => {
                        fixes = resubscribed;
                        log_info!("location subscription now every {}ms", request.min_interval.as_millis());
                    }
                    Err(err) => {
                        log_error!("location re-subscription failed: {err:#}");
                        ctx.record(&Err(subscription_error(err)));
                        break;
                    }
                }
            }
            fix = fixes.recv() => match fix {
                Some(fix) => emit_fix(fix, &ctx, &last_fix).await,
                None => {
                    log_warn!("location stream closed; monitor stopping");
                    break;
                }
            },
            Some(()) = force_rx.recv() => {
                ctx.in_flight.store(true, Ordering::SeqCst);
                if let Some(fix) = feed.last_known().await {
                    emit_fix(fix, &ctx, &last_fix).await;
                }
                ctx.in_flight.store(false, Ordering::SeqCst);
            }
        }
    }

    feed.unsubscribe().await;
    log_info!("location monitor stopped");
}

fn subscription_error(err: anyhow::Error) -> AgentError {
    AgentError::TransientQuery {
        log: Source::Location,
        message: format!("subscription failed: {err:#}"),
    }
}

async fn emit_fix(fix: LocationFix, ctx: &MonitorContext, last_fix: &Mutex<Option<LocationFix>>) {
    if let Ok(mut guard) = last_fix.lock() {
        let newer = guard.as_ref().map_or(true, |current| fix.time >= current.time);
        if newer {
            *guard = Some(fix.clone());
        }
    }

    let event = match fix.normalize(&Lookups::default()) {
        Ok(event) => event,
        Err(err) => {
            log_warn!("{}", err);
            return;
        }
    };

    // Location has no watermark; the receipt is not needed.
    let outcome = ctx.dispatcher.submit_events(vec![event]).await.map(|_| 1);
    if let Err(err) = &outcome {
        log_error!("failed to hand location fix to dispatcher: {}", err);
    }
    ctx.record(&outcome);
}
