//! Structural validation of dead-lettered message bodies.
//!
//! A body must be a JSON object. Fan-out deliveries wrap the event in a
//! string `Message` field, which must itself be valid JSON.

use serde_json::Value;

/// Field carrying the inner event of a fan-out envelope.
pub const FAN_OUT_MESSAGE_FIELD: &str = "Message";

/// Check that `body` can be resubmitted. Returns a description of the
/// first problem found.
pub fn validate_envelope(body: &str) -> Result<(), String> {
    let parsed: Value =
        serde_json::from_str(body).map_err(|e| format!("Body is not valid JSON: {}", e))?;

    let Some(object) = parsed.as_object() else {
        return Err("Body must be a JSON object".to_string());
    };

    if let Some(Value::String(inner)) = object.get(FAN_OUT_MESSAGE_FIELD) {
        serde_json::from_str::<Value>(inner)
            .map_err(|e| format!("Inner event is not valid JSON: {}", e))?;
    }

    Ok(())
}
