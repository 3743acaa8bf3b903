//! JSON text codec for params and outputs.
//!
//! Both directions are fallible; callers fold failures into a
//! `ServerError` envelope rather than propagating them.

use serde_json::Value;

/// Encodes a value as compact JSON text.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Decodes JSON text. An empty or whitespace-only document decodes to `null`.
///
/// # Errors
///
/// Returns an error if the text is not a valid JSON document.
pub fn decode(text: &str) -> Result<Value, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
}
