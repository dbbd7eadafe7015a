use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Outbound payload. Structured values are sent as JSON text, strings verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Serialize any `Serialize` value into a structured payload
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    /// Wire form of the payload
    pub fn encode(&self) -> Result<String> {
        match self {
            Payload::Text(text) => Ok(text.clone()),
            Payload::Structured(value) => Ok(serde_json::to_string(value)?),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Inbound message after the opportunistic JSON parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedMessage {
    Structured(Value),
    Text(String),
}

impl DecodedMessage {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            DecodedMessage::Structured(value) => Some(value),
            DecodedMessage::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedMessage::Text(text) => Some(text),
            DecodedMessage::Structured(_) => None,
        }
    }
}

/// Parse raw frame bytes as JSON, falling back to the (lossy UTF-8) text form
pub fn decode(raw: &[u8]) -> DecodedMessage {
    let text = String::from_utf8_lossy(raw);
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => DecodedMessage::Structured(value),
        Err(_) => DecodedMessage::Text(text.into_owned()),
    }
}
