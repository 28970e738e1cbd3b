use serde_json::json;

use crate::error::MalformedRecord;
use crate::models::{CallRecord, Event, Payload, Source};
use crate::normalize::{format_duration_secs, CallType};

use super::{Lookups, SourceRecord};

/// Shown for withheld or private numbers.
const PRIVATE_NUMBER: &str = "Unknown";

impl SourceRecord for CallRecord {
    const SOURCE: Source = Source::Call;

    fn occurred_at(&self) -> i64 {
        self.date
    }

    fn normalize(&self, lookups: &Lookups) -> Result<Event, MalformedRecord> {
        if self.date <= 0 {
            return Err(MalformedRecord::new(Self::SOURCE, "missing date"));
        }
        if self.duration_secs < 0 {
            return Err(MalformedRecord::new(
                Self::SOURCE,
                format!("negative duration {}", self.duration_secs),
            ));
        }

        let number = match self.number.trim() {
            "" => PRIVATE_NUMBER,
            trimmed => trimmed,
        };
        let contact_name = lookups
            .contact_name(number)
            .unwrap_or_else(|| number.to_string());
        let call_type = CallType::from_code(self.call_type);

        let mut payload = Payload::new();
        payload.insert("phone_number".into(), json!(number));
        payload.insert("contact_name".into(), json!(contact_name));
        payload.insert("type".into(), json!(call_type.as_str()));
        payload.insert("type_code".into(), json!(self.call_type));
        payload.insert("date".into(), json!(self.date));
        payload.insert("duration".into(), json!(self.duration_secs));
        payload.insert(
            "duration_formatted".into(),
            json!(format_duration_secs(self.duration_secs)),
        );
        payload.insert("call_direction".into(), json!(call_type.direction()));
        payload.insert(
            "call_status".into(),
            json!(call_type.status(self.duration_secs)),
        );

        Ok(Event::new(
            Self::SOURCE,
            self.date,
            format!("call:{number}:{}", self.date),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::lookup::testing::lookups;

    #[test]
    fn test_normalize_outgoing_call() {
        let record = CallRecord {
            number: "+15550100".into(),
            call_type: 2,
            date: 42_000,
            duration_secs: 125,
        };
        let lookups = lookups(&[("+15550100", "Front desk")], &[]);
        let event = record.normalize(&lookups).unwrap();

        assert_eq!(event.dedupe_key, "call:+15550100:42000");
        assert_eq!(event.payload["contact_name"], "Front desk");
        assert_eq!(event.payload["type"], "outgoing");
        assert_eq!(event.payload["type_code"], 2);
        assert_eq!(event.payload["duration_formatted"], "2m 5s");
        assert_eq!(event.payload["call_direction"], "outbound");
        assert_eq!(event.payload["call_status"], "answered");
    }

    #[test]
    fn test_private_number_and_missed_call() {
        let record = CallRecord {
            number: String::new(),
            call_type: 3,
            date: 7,
            duration_secs: 0,
        };
        let event = record.normalize(&Lookups::default()).unwrap();
        assert_eq!(event.payload["phone_number"], "Unknown");
        assert_eq!(event.payload["contact_name"], "Unknown");
        assert_eq!(event.payload["call_status"], "missed");
        assert_eq!(event.payload["call_direction"], "inbound");
    }

    #[test]
    fn test_negative_duration_is_malformed() {
        let record = CallRecord {
            number: "1".into(),
            call_type: 1,
            date: 7,
            duration_secs: -3,
        };
        assert!(record.normalize(&Lookups::default()).is_err());
    }
}
