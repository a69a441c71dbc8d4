use serde_json::{Map, Value};

use courier_common::types::EventCategory;

use crate::{Decoded, EventDecoder, records};

/// Queue delivery batch decoder.
///
/// Recognizes a batch whose first record carries a delivery handle,
/// a message id and a body:
/// `{"Records": [{"receiptHandle": "...", "messageId": "...", "body": "..."}]}`
pub struct MessageBatchDecoder;

impl MessageBatchDecoder {
    pub fn new() -> Self {
        Self
    }

    fn is_queue_record(record: &Value) -> bool {
        record.get("receiptHandle").is_some()
            && record.get("messageId").is_some()
            && record.get("body").is_some()
    }
}

impl Default for MessageBatchDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for MessageBatchDecoder {
    fn decode(&self, payload: &Map<String, Value>) -> Option<Decoded> {
        let records = records(payload)?;
        if !Self::is_queue_record(&records[0]) {
            return None;
        }

        let mut errors = Vec::new();
        let mut max_receive_count: Option<u64> = None;

        for (i, record) in records.iter().enumerate() {
            if !record.get("body").is_some_and(Value::is_string) {
                errors.push(format!("Record {} is missing body", i));
            }
            if !record.get("messageId").is_some_and(Value::is_string) {
                errors.push(format!("Record {} is missing messageId", i));
            }

            // Queue providers report the receive count as a string attribute
            let count = record
                .get("attributes")
                .and_then(|a| a.get("ApproximateReceiveCount"))
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()));
            if let Some(count) = count {
                max_receive_count = Some(max_receive_count.map_or(count, |m| m.max(count)));
            }
        }

        let mut metadata = Map::new();
        metadata.insert("recordCount".to_string(), Value::from(records.len()));
        if let Some(source) = records[0].get("eventSource").and_then(Value::as_str) {
            metadata.insert("eventSource".to_string(), Value::from(source));
        }
        if let Some(count) = max_receive_count {
            metadata.insert("maxReceiveCount".to_string(), Value::from(count));
        }

        Some(Decoded {
            category: EventCategory::MessageBatch,
            errors,
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "Message batch"
    }
}
