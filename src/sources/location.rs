//! Push-based location source.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::MalformedRecord;
use crate::models::{Event, LocationFix, Payload, Source};

use super::{Lookups, SourceRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum LocationPriority {
    #[default]
    HighAccuracy,
    Balanced,
    LowPower,
}

/// Parameters of a location subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub min_interval: Duration,
    pub priority: LocationPriority,
}

impl LocationRequest {
    pub fn new(min_interval: Duration, priority: LocationPriority) -> Self {
        Self {
            min_interval,
            priority,
        }
    }
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::new(Source::Location.default_interval(), LocationPriority::default())
    }
}

/// Continuous location updates from the platform.
///
/// The stream returned by [`LocationFeed::subscribe`] closes when the
/// platform revokes access; the monitor treats that as a stop.
#[async_trait]
pub trait LocationFeed: Send + Sync {
    async fn is_authorized(&self) -> bool;

    /// Most recent cached fix, if the platform has one.
    async fn last_known(&self) -> Option<LocationFix>;

    async fn subscribe(&self, request: LocationRequest) -> anyhow::Result<mpsc::Receiver<LocationFix>>;

    async fn unsubscribe(&self);
}

fn optional<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

impl SourceRecord for LocationFix {
    const SOURCE: Source = Source::Location;

    fn occurred_at(&self) -> i64 {
        self.time
    }

    fn normalize(&self, _lookups: &Lookups) -> Result<Event, MalformedRecord> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(MalformedRecord::new(
                Self::SOURCE,
                format!("coordinates out of range ({}, {})", self.latitude, self.longitude),
            ));
        }
        if self.time <= 0 {
            return Err(MalformedRecord::new(Self::SOURCE, "missing fix time"));
        }

        let mut payload = Payload::new();
        payload.insert("latitude".into(), json!(self.latitude));
        payload.insert("longitude".into(), json!(self.longitude));
        payload.insert("accuracy".into(), json!(self.accuracy_m));
        payload.insert("altitude".into(), optional(self.altitude));
        payload.insert("speed".into(), optional(self.speed));
        payload.insert("bearing".into(), optional(self.bearing));
        payload.insert("provider".into(), json!(self.provider));
        payload.insert("timestamp".into(), json!(self.time));

        Ok(Event::new(
            Self::SOURCE,
            self.time,
            format!("location:{}", self.time),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64, longitude: f64) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            accuracy_m: 12.5,
            altitude: None,
            speed: Some(1.5),
            bearing: None,
            provider: "fused".into(),
            time: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_normalize_fix() {
        let event = fix(52.52, 13.405).normalize(&Lookups::default()).unwrap();
        assert_eq!(event.dedupe_key, "location:1700000000000");
        assert_eq!(event.payload["latitude"], 52.52);
        assert_eq!(event.payload["accuracy"], 12.5);
        assert_eq!(event.payload["speed"], 1.5);
        assert!(event.payload["altitude"].is_null());
        assert_eq!(event.payload["provider"], "fused");
    }

    #[test]
    fn test_out_of_range_fix_is_malformed() {
        assert!(fix(91.0, 0.0).normalize(&Lookups::default()).is_err());
        assert!(fix(0.0, -180.5).normalize(&Lookups::default()).is_err());
    }
}
