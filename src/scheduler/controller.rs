use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::SyncDispatcher;
use crate::error::AgentError;
use crate::models::{LocationFix, Source};
use crate::sources::location::LocationPriority;
use crate::sources::{LocationFeed, LocationRequest, SourceAdapter};
use crate::store::StateStore;

use super::state::{MonitorState, MonitorStats, MonitorStatus};
use super::worker::{location_loop, polling_loop, MonitorContext};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a `force_sync` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceSync {
    Triggered,
    /// A poll is already running or queued; nothing new was scheduled.
    AlreadyInFlight,
}

enum MonitorKind {
    Polling(Arc<dyn SourceAdapter>),
    Push {
        feed: Arc<dyn LocationFeed>,
        priority: LocationPriority,
    },
}

enum IntervalControl {
    Polling(watch::Sender<Duration>),
    Push {
        requests: watch::Sender<LocationRequest>,
        priority: LocationPriority,
    },
}

impl IntervalControl {
    fn apply(&self, interval: Duration) {
        // A closed channel means the task is already winding down.
        match self {
            IntervalControl::Polling(intervals) => {
                let _ = intervals.send(interval);
            }
            IntervalControl::Push { requests, priority } => {
                let _ = requests.send(LocationRequest::new(interval, *priority));
            }
        }
    }
}

struct RunningMonitor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    force_tx: mpsc::Sender<()>,
    control: IntervalControl,
    in_flight: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

struct MonitorSlot {
    kind: MonitorKind,
    interval: Duration,
    running: Option<RunningMonitor>,
    stats: Arc<StdMutex<MonitorStats>>,
}

impl MonitorSlot {
    fn new(kind: MonitorKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            running: None,
            stats: Arc::new(StdMutex::new(MonitorStats::default())),
        }
    }

    /// The running monitor, unless its task has ended on its own.
    fn active(&self) -> Option<&RunningMonitor> {
        self.running
            .as_ref()
            .filter(|running| !running.handle.is_finished())
    }

    async fn is_authorized(&self) -> bool {
        match &self.kind {
            MonitorKind::Polling(adapter) => adapter.is_authorized().await,
            MonitorKind::Push { feed, .. } => feed.is_authorized().await,
        }
    }
}

struct SchedulerInner {
    slots: BTreeMap<Source, Arc<Mutex<MonitorSlot>>>,
    store: Arc<dyn StateStore>,
    dispatcher: SyncDispatcher,
    poll_timeout: Duration,
    last_fix: Arc<StdMutex<Option<LocationFix>>>,
}

pub struct SchedulerBuilder {
    store: Arc<dyn StateStore>,
    dispatcher: SyncDispatcher,
    poll_timeout: Duration,
    intervals: BTreeMap<Source, Duration>,
    kinds: BTreeMap<Source, MonitorKind>,
}

impl SchedulerBuilder {
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Default interval for a source; a persisted override still wins.
    pub fn interval(mut self, source: Source, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.intervals.insert(source, interval);
        }
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.kinds
            .insert(adapter.source(), MonitorKind::Polling(adapter));
        self
    }

    pub fn location_feed(mut self, feed: Arc<dyn LocationFeed>, priority: LocationPriority) -> Self {
        self.kinds
            .insert(Source::Location, MonitorKind::Push { feed, priority });
        self
    }

    pub fn build(self) -> MonitorScheduler {
        let intervals = self.intervals;
        let slots = self
            .kinds
            .into_iter()
            .map(|(source, kind)| {
                let interval = intervals
                    .get(&source)
                    .copied()
                    .unwrap_or_else(|| source.default_interval());
                (source, Arc::new(Mutex::new(MonitorSlot::new(kind, interval))))
            })
            .collect();

        MonitorScheduler {
            inner: Arc::new(SchedulerInner {
                slots,
                store: self.store,
                dispatcher: self.dispatcher,
                poll_timeout: self.poll_timeout,
                last_fix: Arc::new(StdMutex::new(None)),
            }),
        }
    }
}

/// Owns one monitor per registered source. Operations on the same source are
/// serialized; different sources run independently.
#[derive(Clone)]
pub struct MonitorScheduler {
    inner: Arc<SchedulerInner>,
}

impl MonitorScheduler {
    pub fn builder(store: Arc<dyn StateStore>, dispatcher: SyncDispatcher) -> SchedulerBuilder {
        SchedulerBuilder {
            store,
            dispatcher,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            intervals: BTreeMap::new(),
            kinds: BTreeMap::new(),
        }
    }

    pub fn registered_sources(&self) -> Vec<Source> {
        self.inner.slots.keys().copied().collect()
    }

    fn slot(&self, source: Source) -> Result<Arc<Mutex<MonitorSlot>>, AgentError> {
        self.inner
            .slots
            .get(&source)
            .cloned()
            .ok_or(AgentError::NotRegistered(source))
    }

    /// Starts monitoring `source`. Already running is not an error.
    pub async fn start(&self, source: Source) -> Result<(), AgentError> {
        let slot = self.slot(source)?;
        let mut slot = slot.lock().await;

        if slot.active().is_some() {
            return Ok(());
        }
        if let Some(finished) = slot.running.take() {
            let _ = finished.handle.await;
        }

        if !slot.is_authorized().await {
            warn!("cannot start {source} monitor: permission denied");
            return Err(AgentError::PermissionDenied(source));
        }

        if let Some(stored) = self.inner.store.load_interval(source).await? {
            if !stored.is_zero() {
                slot.interval = stored;
            }
        }

        let cancel = CancellationToken::new();
        let (force_tx, force_rx) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let ctx = MonitorContext {
            store: Arc::clone(&self.inner.store),
            dispatcher: self.inner.dispatcher.clone(),
            poll_timeout: self.inner.poll_timeout,
            in_flight: Arc::clone(&in_flight),
            stats: Arc::clone(&slot.stats),
            cancel: cancel.clone(),
        };

        let (handle, control) = match &slot.kind {
            MonitorKind::Polling(adapter) => {
                let (interval_tx, interval_rx) = watch::channel(slot.interval);
                let handle = tokio::spawn(polling_loop(
                    Arc::clone(adapter),
                    ctx,
                    interval_rx,
                    force_rx,
                ));
                (handle, IntervalControl::Polling(interval_tx))
            }
            MonitorKind::Push { feed, priority } => {
                let request = LocationRequest::new(slot.interval, *priority);
                let (request_tx, request_rx) = watch::channel(request);
                let handle = tokio::spawn(location_loop(
                    Arc::clone(feed),
                    ctx,
                    request_rx,
                    force_rx,
                    Arc::clone(&self.inner.last_fix),
                ));
                (
                    handle,
                    IntervalControl::Push {
                        requests: request_tx,
                        priority: *priority,
                    },
                )
            }
        };

        slot.running = Some(RunningMonitor {
            handle,
            cancel,
            force_tx,
            control,
            in_flight,
            started_at: Utc::now(),
        });
        info!("{source} monitor running every {}ms", slot.interval.as_millis());
        Ok(())
    }

    /// Stops `source` after its in-flight poll, if any, has handed off.
    pub async fn stop(&self, source: Source) -> Result<(), AgentError> {
        let slot = self.slot(source)?;
        let mut slot = slot.lock().await;
        Self::stop_slot(source, &mut slot).await;
        Ok(())
    }

    /// Returns whether a monitor was actually running.
    async fn stop_slot(source: Source, slot: &mut MonitorSlot) -> bool {
        let Some(running) = slot.running.take() else {
            return false;
        };
        let was_active = !running.handle.is_finished();

        running.cancel.cancel();
        if let Err(err) = running.handle.await {
            error!("{source} monitor task failed to join: {err}");
        }
        if was_active {
            info!("{source} monitor stopped");
        }
        was_active
    }

    /// Polls `source` now. A no-op while a poll is in flight.
    pub async fn force_sync(&self, source: Source) -> Result<ForceSync, AgentError> {
        let slot = self.slot(source)?;
        let slot = slot.lock().await;
        let running = slot.active().ok_or(AgentError::NotRunning(source))?;

        if running.in_flight.load(Ordering::SeqCst) {
            return Ok(ForceSync::AlreadyInFlight);
        }
        match running.force_tx.try_send(()) {
            Ok(()) => Ok(ForceSync::Triggered),
            Err(mpsc::error::TrySendError::Full(())) => Ok(ForceSync::AlreadyInFlight),
            Err(mpsc::error::TrySendError::Closed(())) => Err(AgentError::NotRunning(source)),
        }
    }

    /// Persists a new interval for `source` and applies it to the running
    /// monitor: the next tick lands `interval` after the previous scheduled
    /// tick.
    pub async fn reconfigure(&self, source: Source, interval: Duration) -> Result<(), AgentError> {
        if interval.is_zero() {
            return Err(AgentError::InvalidInterval {
                log: source,
                message: "interval must be greater than zero".into(),
            });
        }

        let slot = self.slot(source)?;
        let mut slot = slot.lock().await;
        self.inner.store.save_interval(source, interval).await?;
        slot.interval = interval;

        if let Some(running) = slot.active() {
            running.control.apply(interval);
        }

        info!("{source} interval set to {}ms", interval.as_millis());
        Ok(())
    }

    /// Stops every running monitor and returns the sources that were running.
    pub async fn stop_all(&self) -> Vec<Source> {
        let mut stopped = Vec::new();
        for (&source, slot) in &self.inner.slots {
            let mut slot = slot.lock().await;
            if Self::stop_slot(source, &mut slot).await {
                stopped.push(source);
            }
        }
        stopped
    }

    /// Stops everything that runs, then starts the same set again.
    pub async fn restart(&self) -> Result<Vec<Source>, AgentError> {
        let previously_running = self.stop_all().await;
        let mut restarted = Vec::with_capacity(previously_running.len());
        let mut first_error = None;

        for source in previously_running {
            match self.start(source).await {
                Ok(()) => restarted.push(source),
                Err(err) => {
                    warn!("{source} monitor did not come back after restart: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(restarted),
        }
    }

    pub async fn state(&self, source: Source) -> Result<MonitorState, AgentError> {
        let slot = self.slot(source)?;
        let slot = slot.lock().await;

        let mut state = MonitorState::stopped(source, slot.interval);
        if let Some(running) = slot.active() {
            state.status = MonitorStatus::Running;
            state.started_at = Some(running.started_at);
        }
        let stats = slot
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();
        Ok(state.with_stats(&stats))
    }

    pub async fn running_sources(&self) -> Vec<Source> {
        let mut running = Vec::new();
        for (&source, slot) in &self.inner.slots {
            if slot.lock().await.active().is_some() {
                running.push(source);
            }
        }
        running
    }

    /// Most recent fix seen by the location monitor.
    pub fn last_known_location(&self) -> Option<LocationFix> {
        self.inner
            .last_fix
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}
