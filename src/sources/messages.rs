use serde_json::{json, Value};

use crate::error::MalformedRecord;
use crate::models::{Event, MessageRecord, Payload, Source};

use super::{Lookups, SourceRecord};

impl SourceRecord for MessageRecord {
    const SOURCE: Source = Source::Message;

    fn occurred_at(&self) -> i64 {
        self.date
    }

    fn normalize(&self, lookups: &Lookups) -> Result<Event, MalformedRecord> {
        if self.date <= 0 {
            return Err(MalformedRecord::new(Self::SOURCE, "missing date"));
        }
        let address = self.address.trim();
        if address.is_empty() {
            return Err(MalformedRecord::new(Self::SOURCE, "missing address"));
        }

        let contact_name = lookups
            .contact_name(address)
            .unwrap_or_else(|| address.to_string());

        let mut payload = Payload::new();
        payload.insert("folder".into(), json!(self.folder.as_str()));
        payload.insert("phone_number".into(), json!(address));
        payload.insert("contact_name".into(), json!(contact_name));
        payload.insert("date".into(), json!(self.date));
        payload.insert(
            "date_sent".into(),
            self.date_sent.map(Value::from).unwrap_or(Value::Null),
        );
        payload.insert("is_read".into(), json!(self.read));
        payload.insert("status".into(), json!(self.status));
        payload.insert(
            "thread_id".into(),
            self.thread_id.map(Value::from).unwrap_or(Value::Null),
        );

        Ok(Event::new(
            Self::SOURCE,
            self.date,
            format!("message:{address}:{}", self.date),
            payload,
        ))
    }
}
