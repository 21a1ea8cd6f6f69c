//! Message payloads carried by the channel bus.

use crate::error::MessagingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A message published on a channel.
///
/// Text travels over a transport as the raw string; JSON as its serialized
/// form. On the way back in, payloads that parse as a JSON object or array
/// become [`Message::Json`] and everything else [`Message::Text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Text(String),
    Json(Value),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn json(value: Value) -> Self {
        Message::Json(value)
    }

    /// The text content, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Json(_) => None,
        }
    }

    /// The JSON content, if this is a structured message.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Message::Json(v) => Some(v),
            Message::Text(_) => None,
        }
    }

    /// Encode for a transport.
    pub fn to_wire(&self) -> Result<String, MessagingError> {
        match self {
            Message::Text(s) => Ok(s.clone()),
            Message::Json(v) => Ok(serde_json::to_string(v)?),
        }
    }

    /// Decode a payload received from a transport.
    pub fn from_wire(raw: String) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(&raw)
            {
                return Message::Json(value);
            }
        }
        Message::Text(raw)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(s) => f.write_str(s),
            Message::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Value> for Message {
    fn from(v: Value) -> Self {
        Message::Json(v)
    }
}

impl PartialEq<&str> for Message {
    fn eq(&self, other: &&str) -> bool {
        self.as_text() == Some(*other)
    }
}
