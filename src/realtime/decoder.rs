//! Frame envelope decoding.
//!
//! Every notification frame is a JSON object `{"topic": "<Namespace>", "payload": <any>}`.
//! Extra envelope fields are ignored. Some publishers double-encode the payload as a JSON
//! string; such a string is unwrapped when it holds an object or an array.

use serde::Deserialize;
use serde_json::Value;

use super::error::DecodeError;

/// A decoded frame: topic discriminator plus untyped payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(Deserialize)]
struct Envelope {
    topic: Option<Value>,
    #[serde(default)]
    payload: Value,
}

/// Splits a text frame into topic and payload. Never panics.
pub fn decode(frame: &str) -> Result<RawMessage, DecodeError> {
    let value: Value = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let envelope: Envelope = serde_json::from_value(value).map_err(DecodeError::InvalidJson)?;
    let Some(Value::String(topic)) = envelope.topic else {
        return Err(DecodeError::MissingTopic);
    };

    Ok(RawMessage {
        topic,
        payload: unwrap_encoded(envelope.payload),
    })
}

fn unwrap_encoded(payload: Value) -> Value {
    match payload {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(inner @ (Value::Object(_) | Value::Array(_))) => inner,
            _ => Value::String(text),
        },
        other => other,
    }
}
