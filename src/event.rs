// SPDX-License-Identifier: Apache-2.0

//! The wire-level event emitted for every exported log line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single structured log event.
///
/// `fields` always carries `source` (absolute file path) and `offset`
/// (byte offset directly after the line that produced the event), plus
/// whatever the reader stack attached (`json`, `message`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Event {
    pub fn new(topic: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            timestamp,
            fields: Map::new(),
            meta: Map::new(),
        }
    }

    /// Fetch a field by key, returning None when absent.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let mut event = Event::new("syslog", Utc::now());
        event
            .fields
            .insert("source".into(), Value::from("/var/log/syslog"));
        event.fields.insert("offset".into(), Value::from(42u64));
        event.fields.insert("message".into(), Value::from("hello"));

        let json = serde_json::to_string(&event).unwrap();
        let loaded: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded, event);
        assert_eq!(loaded.field("offset"), Some(&Value::from(42u64)));
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let event = Event::new("t", Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
