//! Source adapters: pull new records from an on-device log and map them to
//! canonical events.

pub mod app_usage;
pub mod calls;
pub mod location;
pub mod lookup;
pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::error::{AgentError, MalformedRecord};
use crate::models::{Event, Source};

pub use location::{LocationFeed, LocationRequest};
pub use lookup::{AppCatalog, AppInfo, ContactDirectory, Lookups};

/// What one poll produced. `new_watermark` is a proposal; only the
/// dispatcher commits it after delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Watermark the poll started from.
    pub since: i64,
    pub events: Vec<Event>,
    pub new_watermark: i64,
}

impl PollOutcome {
    pub fn idle(watermark: i64) -> Self {
        Self {
            since: watermark,
            events: Vec::new(),
            new_watermark: watermark,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.events.is_empty() && self.new_watermark == self.since
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn is_authorized(&self) -> bool;

    /// Returns every record strictly newer than `watermark`, oldest first.
    /// An unauthorized source yields an idle outcome, not an error.
    async fn poll(&self, watermark: i64) -> Result<PollOutcome, AgentError>;
}

/// A raw provider record that knows how to become an [`Event`].
pub trait SourceRecord: Send + 'static {
    const SOURCE: Source;

    /// Logical time of the record in the source log, epoch milliseconds.
    fn occurred_at(&self) -> i64;

    fn normalize(&self, lookups: &Lookups) -> Result<Event, MalformedRecord>;
}

/// Rows read from a log in one query.
#[derive(Debug)]
pub struct LogBatch<R> {
    pub records: Vec<R>,
    /// Logical time and decode error of each row that could not be read.
    pub unreadable: Vec<(i64, String)>,
}

impl<R> Default for LogBatch<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            unreadable: Vec::new(),
        }
    }
}

impl<R> From<Vec<R>> for LogBatch<R> {
    fn from(records: Vec<R>) -> Self {
        Self {
            records,
            unreadable: Vec::new(),
        }
    }
}

/// Queryable, append-only on-device log.
#[async_trait]
pub trait LogProvider: Send + Sync {
    type Record: SourceRecord;

    async fn is_authorized(&self) -> bool;

    /// Records with logical time greater than `since`. Ordering is expected
    /// but not relied upon. A row that cannot be decoded is reported in
    /// `unreadable` and does not fail the query.
    async fn query(&self, since: i64) -> anyhow::Result<LogBatch<Self::Record>>;
}

#[async_trait]
impl<P: LogProvider + ?Sized> LogProvider for Arc<P> {
    type Record = P::Record;

    async fn is_authorized(&self) -> bool {
        (**self).is_authorized().await
    }

    async fn query(&self, since: i64) -> anyhow::Result<LogBatch<Self::Record>> {
        (**self).query(since).await
    }
}

/// Polling adapter shared by the message, call and app-usage logs.
pub struct LogAdapter<P> {
    provider: P,
    lookups: Lookups,
}

impl<P: LogProvider> LogAdapter<P> {
    pub fn new(provider: P, lookups: Lookups) -> Self {
        Self { provider, lookups }
    }
}

#[async_trait]
impl<P: LogProvider> SourceAdapter for LogAdapter<P> {
    fn source(&self) -> Source {
        P::Record::SOURCE
    }

    async fn is_authorized(&self) -> bool {
        self.provider.is_authorized().await
    }

    async fn poll(&self, watermark: i64) -> Result<PollOutcome, AgentError> {
        let source = P::Record::SOURCE;
        if !self.provider.is_authorized().await {
            debug!("{source} log not authorized; poll is idle");
            return Ok(PollOutcome::idle(watermark));
        }

        let LogBatch {
            mut records,
            unreadable,
        } = self
            .provider
            .query(watermark)
            .await
            .map_err(|err| AgentError::TransientQuery {
                log: source,
                message: format!("{err:#}"),
            })?;

        records.retain(|record| record.occurred_at() > watermark);
        records.sort_by_key(|record| record.occurred_at());

        let mut events = Vec::with_capacity(records.len());
        let mut new_watermark = watermark;
        for (at, reason) in unreadable.iter().filter(|(at, _)| *at > watermark) {
            warn!("skipping unreadable {source} row at {at}: {reason}");
            new_watermark = new_watermark.max(*at);
        }
        for record in &records {
            // A record that fails to map never becomes valid, so the
            // watermark moves past it either way.
            new_watermark = new_watermark.max(record.occurred_at());
            match record.normalize(&self.lookups) {
                Ok(event) => events.push(event),
                Err(err) => warn!("skipping record at {}: {err}", record.occurred_at()),
            }
        }

        Ok(PollOutcome {
            since: watermark,
            events,
            new_watermark,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Provider returning a fixed record list, filtered by nothing.
    pub struct ScriptedProvider<R> {
        pub authorized: bool,
        pub records: Mutex<Vec<R>>,
        pub fail: bool,
    }

    impl<R> ScriptedProvider<R> {
        pub fn new(records: Vec<R>) -> Self {
            Self {
                authorized: true,
                records: Mutex::new(records),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl<R: SourceRecord + Clone + Sync> LogProvider for ScriptedProvider<R> {
        type Record = R;

        async fn is_authorized(&self) -> bool {
            self.authorized
        }

        async fn query(&self, _since: i64) -> anyhow::Result<LogBatch<R>> {
            if self.fail {
                anyhow::bail!("provider cursor closed");
            }
            Ok(self.records.lock().unwrap().clone().into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::models::CallRecord;

    fn call(date: i64) -> CallRecord {
        CallRecord {
            number: "+15550100".into(),
            call_type: 1,
            date,
            duration_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_poll_filters_and_sorts_defensively() {
        // Out of order, with stale rows the provider should not have returned.
        let provider = ScriptedProvider::new(vec![call(1_010), call(990), call(1_001), call(1_000)]);
        let adapter = LogAdapter::new(provider, Lookups::default());

        let outcome = adapter.poll(1_000).await.unwrap();
        let times: Vec<i64> = outcome.events.iter().map(|e| e.occurred_at).collect();
        assert_eq!(times, vec![1_001, 1_010]);
        assert_eq!(outcome.since, 1_000);
        assert_eq!(outcome.new_watermark, 1_010);
    }

    #[tokio::test]
    async fn test_poll_without_records_is_idle() {
        let adapter = LogAdapter::new(ScriptedProvider::<CallRecord>::new(vec![]), Lookups::default());
        let outcome = adapter.poll(500).await.unwrap();
        assert!(outcome.is_idle());
        assert_eq!(outcome.new_watermark, 500);
    }

    #[tokio::test]
    async fn test_unauthorized_poll_is_idle_not_error() {
        let mut provider = ScriptedProvider::new(vec![call(2_000)]);
        provider.authorized = false;
        let adapter = LogAdapter::new(provider, Lookups::default());

        let outcome = adapter.poll(1_000).await.unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.new_watermark, 1_000);
        assert!(!adapter.is_authorized().await);
    }

    #[tokio::test]
    async fn test_provider_failure_is_transient() {
        let mut provider = ScriptedProvider::new(vec![call(2_000)]);
        provider.fail = true;
        let adapter = LogAdapter::new(provider, Lookups::default());

        let err = adapter.poll(1_000).await.unwrap_err();
        assert!(matches!(err, AgentError::TransientQuery { log: Source::Call, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped_but_passed() {
        let mut bad = call(1_005);
        bad.duration_secs = -1;
        let provider = ScriptedProvider::new(vec![call(1_001), bad]);
        let adapter = LogAdapter::new(provider, Lookups::default());

        let outcome = adapter.poll(1_000).await.unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.new_watermark, 1_005);
    }
}
