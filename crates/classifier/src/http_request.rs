use serde_json::{Map, Value};

use courier_common::types::EventCategory;

use crate::{Decoded, EventDecoder};

/// HTTP request decoder.
///
/// Recognizes gateway-style payloads carrying any of `httpMethod`, `path`,
/// `rawPath` or `requestContext`. The method may be top-level or nested under
/// `requestContext.http.method`.
pub struct HttpRequestDecoder;

impl HttpRequestDecoder {
    pub fn new() -> Self {
        Self
    }

    fn method(payload: &Map<String, Value>) -> Option<&str> {
        payload
            .get("httpMethod")
            .and_then(Value::as_str)
            .or_else(|| {
                payload
                    .get("requestContext")?
                    .get("http")?
                    .get("method")?
                    .as_str()
            })
    }

    fn path(payload: &Map<String, Value>) -> Option<&str> {
        payload
            .get("path")
            .and_then(Value::as_str)
            .or_else(|| payload.get("rawPath").and_then(Value::as_str))
    }

    fn count_entries(payload: &Map<String, Value>, field: &str) -> usize {
        payload
            .get(field)
            .and_then(Value::as_object)
            .map_or(0, |m| m.len())
    }
}

impl Default for HttpRequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for HttpRequestDecoder {
    fn decode(&self, payload: &Map<String, Value>) -> Option<Decoded> {
        let http_shaped = ["httpMethod", "path", "rawPath", "requestContext"]
            .iter()
            .any(|field| payload.contains_key(*field));
        if !http_shaped {
            return None;
        }

        let mut errors = Vec::new();
        let mut metadata = Map::new();

        match Self::method(payload) {
            Some(method) => {
                metadata.insert("method".to_string(), Value::from(method.to_uppercase()));
            }
            None => errors.push("HTTP request is missing a method".to_string()),
        }
        if let Some(path) = Self::path(payload) {
            metadata.insert("path".to_string(), Value::from(path));
        }
        metadata.insert(
            "headerCount".to_string(),
            Value::from(Self::count_entries(payload, "headers")),
        );
        metadata.insert(
            "queryParameterCount".to_string(),
            Value::from(Self::count_entries(payload, "queryStringParameters")),
        );
        metadata.insert(
            "hasBody".to_string(),
            Value::from(payload.get("body").is_some_and(|b| !b.is_null())),
        );

        Some(Decoded {
            category: EventCategory::HttpRequest,
            errors,
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "HTTP request"
    }
}
