//! JSON payloads exchanged on the bus.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::topics::TopicName;
use crate::errors::PayloadError;

/// Local wall-clock format used in `ready` and `sent` events
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub device: String,
    pub baudrate: u32,
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentPayload {
    pub result: String,
    pub datetime: String,
    pub number: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedPayload {
    pub number: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Everything the bridge publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Ready(ReadyPayload),
    Sent(SentPayload),
    Received(ReceivedPayload),
    Error(ErrorPayload),
}

impl BridgeEvent {
    pub fn ready(device: &str, baudrate: u32) -> Self {
        BridgeEvent::Ready(ReadyPayload {
            device: device.to_string(),
            baudrate,
            at: timestamp_now(),
        })
    }

    pub fn sent(number: &str, text: &str) -> Self {
        BridgeEvent::Sent(SentPayload {
            result: "success".to_string(),
            datetime: timestamp_now(),
            number: number.to_string(),
            text: text.to_string(),
        })
    }

    pub fn received(number: &str, text: &str) -> Self {
        BridgeEvent::Received(ReceivedPayload {
            number: number.to_string(),
            text: text.to_string(),
        })
    }

    pub fn error(reason: impl Into<String>) -> Self {
        BridgeEvent::Error(ErrorPayload {
            error: reason.into(),
        })
    }

    pub fn topic(&self) -> TopicName {
        match self {
            BridgeEvent::Ready(_) => TopicName::Ready,
            BridgeEvent::Sent(_) => TopicName::Sent,
            BridgeEvent::Received(_) => TopicName::Received,
            BridgeEvent::Error(_) => TopicName::Error,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            BridgeEvent::Ready(p) => serde_json::to_string(p),
            BridgeEvent::Sent(p) => serde_json::to_string(p),
            BridgeEvent::Received(p) => serde_json::to_string(p),
            BridgeEvent::Error(p) => serde_json::to_string(p),
        }
    }
}

/// A validated request from the `send` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub number: String,
    pub text: String,
}

#[derive(Deserialize)]
struct RawRequest {
    number: Option<String>,
    text: Option<String>,
}

impl OutboundRequest {
    /// Parse a `send` payload. Requires a JSON object whose `number` and `text` are
    /// non-empty strings; extra keys are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(PayloadError::Malformed(format!("expected object, got {}", value)));
        }
        let raw: RawRequest =
            serde_json::from_value(value).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        let number = raw
            .number
            .filter(|n| !n.is_empty())
            .ok_or(PayloadError::MissingField("number"))?;
        let text = raw
            .text
            .filter(|t| !t.is_empty())
            .ok_or(PayloadError::MissingField("text"))?;
        Ok(OutboundRequest { number, text })
    }
}
