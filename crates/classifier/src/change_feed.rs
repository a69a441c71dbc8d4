use std::collections::BTreeSet;

use serde_json::{Map, Value};

use courier_common::types::EventCategory;

use crate::{Decoded, EventDecoder, records};

/// Change-feed (table stream) batch decoder.
///
/// Recognizes a batch whose first record names the change and carries the
/// changed item's keys:
/// `{"Records": [{"eventName": "INSERT", "dynamodb": {"Keys": {...}}}]}`
pub struct ChangeFeedDecoder;

impl ChangeFeedDecoder {
    pub fn new() -> Self {
        Self
    }

    fn keys(record: &Value) -> Option<&Map<String, Value>> {
        record.get("dynamodb")?.get("Keys")?.as_object()
    }
}

impl Default for ChangeFeedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for ChangeFeedDecoder {
    fn decode(&self, payload: &Map<String, Value>) -> Option<Decoded> {
        let records = records(payload)?;
        let first = &records[0];
        let first_keys = Self::keys(first)?;
        first.get("eventName")?;

        let mut errors = Vec::new();
        let mut event_names = BTreeSet::new();
        for (i, record) in records.iter().enumerate() {
            match record.get("eventName").and_then(Value::as_str) {
                Some(name) => {
                    event_names.insert(name.to_string());
                }
                None => errors.push(format!("Record {} is missing eventName", i)),
            }
            if Self::keys(record).is_none() {
                errors.push(format!("Record {} is missing keys", i));
            }
        }

        // Key names only; key values are business data
        let mut key_names: Vec<&str> = first_keys.keys().map(String::as_str).collect();
        key_names.sort_unstable();

        let mut metadata = Map::new();
        metadata.insert("recordCount".to_string(), Value::from(records.len()));
        metadata.insert(
            "eventNames".to_string(),
            Value::from(event_names.into_iter().collect::<Vec<_>>()),
        );
        metadata.insert("keyNames".to_string(), Value::from(key_names));
        if let Some(source) = first.get("eventSource").and_then(Value::as_str) {
            metadata.insert("eventSource".to_string(), Value::from(source));
        }

        Some(Decoded {
            category: EventCategory::ChangeFeed,
            errors,
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "Change feed"
    }
}
