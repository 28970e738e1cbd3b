use serde_json::{json, Value};

use crate::error::MalformedRecord;
use crate::models::{Event, Payload, Source, UsageRecord};
use crate::normalize::{app_category_label, format_duration_ms, UsageEventType};

use super::{Lookups, SourceRecord};

impl SourceRecord for UsageRecord {
    const SOURCE: Source = Source::AppUsage;

    fn occurred_at(&self) -> i64 {
        self.timestamp
    }

    fn normalize(&self, lookups: &Lookups) -> Result<Event, MalformedRecord> {
        if self.timestamp <= 0 {
            return Err(MalformedRecord::new(Self::SOURCE, "missing timestamp"));
        }
        let package = self.package_name.trim();
        if package.is_empty() {
            return Err(MalformedRecord::new(Self::SOURCE, "missing package name"));
        }

        let info = lookups.app_info(package);
        let event_type = UsageEventType::from_code(self.event_type);

        let mut payload = Payload::new();
        payload.insert("package_name".into(), json!(package));
        payload.insert(
            "class_name".into(),
            self.class_name.clone().map(Value::from).unwrap_or(Value::Null),
        );
        payload.insert(
            "app_name".into(),
            json!(info.as_ref().map_or(package, |info| info.label.as_str())),
        );
        payload.insert(
            "app_category".into(),
            json!(app_category_label(info.as_ref().and_then(|info| info.category))),
        );
        payload.insert(
            "is_system_app".into(),
            json!(info.as_ref().is_some_and(|info| info.is_system)),
        );
        payload.insert("usage_type".into(), json!("event"));
        payload.insert("event_type".into(), json!(event_type.as_str()));
        payload.insert("event_type_code".into(), json!(self.event_type));
        payload.insert("event_description".into(), json!(event_type.description()));
        payload.insert("timestamp".into(), json!(self.timestamp));

        if let Some(foreground_ms) = self.foreground_ms.filter(|ms| *ms >= 0) {
            payload.insert("usage_duration_ms".into(), json!(foreground_ms));
            payload.insert(
                "usage_duration_formatted".into(),
                json!(format_duration_ms(foreground_ms)),
            );
        }

        Ok(Event::new(
            Self::SOURCE,
            self.timestamp,
            format!("app_usage:{package}:{}:{}", self.event_type, self.timestamp),
            payload,
        ))
    }
}
