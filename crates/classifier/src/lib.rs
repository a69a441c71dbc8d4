//! Inbound invocation classification.
//!
//! An invocation payload is decoded by trying shape decoders in a fixed order
//! (message batch, change feed, HTTP request); the first decoder that
//! recognizes the payload wins. Anything else is `Unknown`. Classification
//! never fails: malformed input comes back as `valid = false` with errors.

pub mod change_feed;
pub mod http_request;
pub mod message_batch;


use serde_json::{Map, Value};

use courier_common::types::{EventCategory, EventClassification, InvocationMeta};

/// Field carrying batch records on queue and change-feed deliveries.
pub const RECORDS_FIELD: &str = "Records";

/// What a decoder recognized.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub category: EventCategory,
    /// Validation problems found after the shape was recognized.
    pub errors: Vec<String>,
    /// Counts and key names only.
    pub metadata: Map<String, Value>,
}

/// Trait that all payload shape decoders implement.
pub trait EventDecoder: Send + Sync {
    /// Attempt to recognize `payload`.
    /// Returns `None` if this decoder doesn't handle the shape.
    fn decode(&self, payload: &Map<String, Value>) -> Option<Decoded>;

    /// Human-readable name for this decoder (e.g., "Message batch").
    fn name(&self) -> &'static str;
}

/// Ordered registry of decoders.
///
/// Batch decoders only see payloads carrying a non-empty `Records` array;
/// request decoders only see payloads without one.
pub struct EventClassifier {
    batch_decoders: Vec<Box<dyn EventDecoder>>,
    request_decoders: Vec<Box<dyn EventDecoder>>,
}

impl EventClassifier {
    pub fn new() -> Self {
        Self {
            batch_decoders: vec![
                Box::new(message_batch::MessageBatchDecoder::new()),
                Box::new(change_feed::ChangeFeedDecoder::new()),
            ],
            request_decoders: vec![Box::new(http_request::HttpRequestDecoder::new())],
        }
    }

    /// Classify one invocation payload.
    pub fn classify(&self, payload: &Value, meta: &InvocationMeta) -> EventClassification {
        let classification = self.classify_inner(payload, meta);

        tracing::debug!(
            request_id = %meta.request_id,
            category = %classification.category,
            valid = classification.valid,
            errors = classification.errors.len(),
            "Classified invocation"
        );

        classification
    }

    fn classify_inner(&self, payload: &Value, meta: &InvocationMeta) -> EventClassification {
        let mut metadata = Map::new();
        metadata.insert("requestId".to_string(), Value::from(meta.request_id.clone()));
        if let Some(function_name) = &meta.function_name {
            metadata.insert("functionName".to_string(), Value::from(function_name.clone()));
        }

        let Some(object) = payload.as_object() else {
            let error = if payload.is_null() {
                "Payload is null".to_string()
            } else {
                format!("Payload must be a JSON object, got {}", json_type(payload))
            };
            return EventClassification::invalid(EventCategory::Unknown, vec![error], metadata);
        };

        if let Some(records) = object.get(RECORDS_FIELD) {
            let records = match records {
                Value::Array(records) if !records.is_empty() => records,
                Value::Array(_) => {
                    metadata.insert("recordCount".to_string(), Value::from(0));
                    return EventClassification::invalid(
                        EventCategory::Unknown,
                        vec![format!("{} array is empty", RECORDS_FIELD)],
                        metadata,
                    );
                }
                other => {
                    return EventClassification::invalid(
                        EventCategory::Unknown,
                        vec![format!(
                            "{} must be an array, got {}",
                            RECORDS_FIELD,
                            json_type(other)
                        )],
                        metadata,
                    );
                }
            };

            if let Some(decoded) = Self::first_match(&self.batch_decoders, object) {
                return Self::finish(decoded, metadata);
            }

            let source = records[0]
                .get("eventSource")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            metadata.insert("recordCount".to_string(), Value::from(records.len()));
            metadata.insert("sourceTag".to_string(), Value::from(source));
            return EventClassification::invalid(
                EventCategory::Unknown,
                vec![format!("Unrecognized record source '{}'", source)],
                metadata,
            );
        }

        if let Some(decoded) = Self::first_match(&self.request_decoders, object) {
            return Self::finish(decoded, metadata);
        }

        let mut keys: Vec<&String> = object.keys().collect();
        keys.sort();
        metadata.insert(
            "topLevelKeys".to_string(),
            Value::from(keys.iter().map(|k| k.as_str()).collect::<Vec<_>>()),
        );
        EventClassification::invalid(
            EventCategory::Unknown,
            vec!["Unrecognized event format: no batch records or HTTP request fields".to_string()],
            metadata,
        )
    }

    fn first_match(decoders: &[Box<dyn EventDecoder>], object: &Map<String, Value>) -> Option<Decoded> {
        decoders.iter().find_map(|decoder| {
            let decoded = decoder.decode(object)?;
            tracing::trace!(decoder = decoder.name(), "Decoder matched payload");
            Some(decoded)
        })
    }

    fn finish(decoded: Decoded, mut metadata: Map<String, Value>) -> EventClassification {
        metadata.extend(decoded.metadata);
        if decoded.errors.is_empty() {
            EventClassification::valid(decoded.category, metadata)
        } else {
            EventClassification::invalid(decoded.category, decoded.errors, metadata)
        }
    }
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON type name for error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The `Records` array of a payload, if present and non-empty.
pub(crate) fn records(payload: &Map<String, Value>) -> Option<&Vec<Value>> {
    payload
        .get(RECORDS_FIELD)
        .and_then(Value::as_array)
        .filter(|records| !records.is_empty())
}
