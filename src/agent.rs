//! Wires the state store, dispatcher, scheduler and command channel into one
//! running agent.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::commands::CommandChannel;
use crate::dispatcher::{DispatcherConfig, RemoteSink, SyncDispatcher};
use crate::error::AgentError;
use crate::models::Source;
use crate::scheduler::MonitorScheduler;
use crate::settings::AgentConfig;
use crate::sources::location::LocationPriority;
use crate::sources::{LocationFeed, SourceAdapter};
use crate::store::StateStore;

pub struct AgentBuilder {
    store: Arc<dyn StateStore>,
    sink: Arc<dyn RemoteSink>,
    dispatch: DispatcherConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    location: Option<(Arc<dyn LocationFeed>, LocationPriority)>,
    intervals: Vec<(Source, Duration)>,
    poll_timeout: Option<Duration>,
    enabled: Vec<Source>,
}

impl AgentBuilder {
    pub fn new(store: Arc<dyn StateStore>, sink: Arc<dyn RemoteSink>) -> Self {
        Self {
            store,
            sink,
            dispatch: DispatcherConfig::default(),
            adapters: Vec::new(),
            location: None,
            intervals: Vec::new(),
            poll_timeout: None,
            enabled: Source::ALL.to_vec(),
        }
    }

    /// Applies dispatch tuning, intervals, poll timeout and the enabled set.
    pub fn config(mut self, config: &AgentConfig) -> Self {
        self.dispatch = DispatcherConfig::from(&config.dispatch);
        self.intervals = Source::ALL
            .iter()
            .map(|&source| (source, config.intervals.for_source(source)))
            .collect();
        self.poll_timeout = Some(config.poll_timeout());
        self.enabled = config.enabled_sources.clone();
        self
    }

    pub fn dispatcher_config(mut self, dispatch: DispatcherConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn location_feed(mut self, feed: Arc<dyn LocationFeed>, priority: LocationPriority) -> Self {
        self.location = Some((feed, priority));
        self
    }

    pub fn interval(mut self, source: Source, interval: Duration) -> Self {
        self.intervals.push((source, interval));
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Sources `start_all` brings up. Defaults to every source.
    pub fn enabled(mut self, sources: &[Source]) -> Self {
        self.enabled = sources.to_vec();
        self
    }

    /// Spawns the dispatcher; monitors stay stopped until `start_all`.
    pub fn build(self) -> Agent {
        let dispatcher = SyncDispatcher::spawn(self.sink, Arc::clone(&self.store), self.dispatch);

        let mut builder = MonitorScheduler::builder(self.store, dispatcher.clone());
        if let Some(timeout) = self.poll_timeout {
            builder = builder.poll_timeout(timeout);
        }
        for (source, interval) in self.intervals {
            builder = builder.interval(source, interval);
        }
        for adapter in self.adapters {
            builder = builder.adapter(adapter);
        }
        if let Some((feed, priority)) = self.location {
            builder = builder.location_feed(feed, priority);
        }

        Agent {
            scheduler: builder.build(),
            dispatcher,
            enabled: self.enabled,
        }
    }
}

pub struct Agent {
    scheduler: MonitorScheduler,
    dispatcher: SyncDispatcher,
    enabled: Vec<Source>,
}

impl Agent {
    pub fn builder(store: Arc<dyn StateStore>, sink: Arc<dyn RemoteSink>) -> AgentBuilder {
        AgentBuilder::new(store, sink)
    }

    /// Starts every enabled, registered source. A source that fails to start
    /// is logged and skipped; the rest still come up.
    pub async fn start_all(&self) -> Vec<Source> {
        let mut started = Vec::new();
        for source in self.scheduler.registered_sources() {
            if !self.enabled.contains(&source) {
                info!("{source} monitor disabled by configuration");
                continue;
            }
            match self.scheduler.start(source).await {
                Ok(()) => started.push(source),
                Err(err) => warn!("{source} monitor not started: {err}"),
            }
        }
        info!("agent started {} of {} monitor(s)", started.len(), self.enabled.len());
        started
    }

    pub fn scheduler(&self) -> &MonitorScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    pub fn commands(&self) -> CommandChannel {
        CommandChannel::new(self.scheduler.clone(), self.dispatcher.clone())
    }

    /// Stops every monitor, then drains the dispatcher.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let stopped = self.scheduler.stop_all().await;
        info!("stopped {} monitor(s); draining dispatcher", stopped.len());
        self.dispatcher.shutdown().await
    }
}
