//! NIP-01 wire frames exchanged with a relay.

use nostr_sdk::prelude::*;
use serde_json::Value;

use crate::RelayError;

/// Frames sent from this client to a relay.
#[derive(Debug, Clone, Copy)]
pub enum ClientMessage<'a> {
    Req {
        subscription_id: &'a str,
        filter: &'a Filter,
    },
    Close {
        subscription_id: &'a str,
    },
    Event(&'a Event),
}

impl ClientMessage<'_> {
    pub fn as_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ClientMessage::Req {
                subscription_id,
                filter,
            } => serde_json::to_string(&("REQ", subscription_id, filter)),
            ClientMessage::Close { subscription_id } => {
                serde_json::to_string(&("CLOSE", subscription_id))
            }
            ClientMessage::Event(event) => serde_json::to_string(&("EVENT", event)),
        }
    }
}

/// Frames received from a relay.
///
/// The event payload stays as raw JSON: whether it is worth parsing and
/// verifying depends on the subscription it is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Value,
    },
    EndOfStoredEvents {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

impl RelayMessage {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)?;
        let arr = value
            .as_array()
            .filter(|arr| !arr.is_empty())
            .ok_or_else(|| protocol("empty relay message"))?;
        let kind = arr[0]
            .as_str()
            .ok_or_else(|| protocol("message type is not a string"))?;

        match kind {
            "EVENT" => {
                if arr.len() < 3 {
                    return Err(protocol("bad EVENT message"));
                }
                Ok(RelayMessage::Event {
                    subscription_id: string_at(arr, 1, "bad EVENT subscription id")?,
                    event: arr[2].clone(),
                })
            }
            "EOSE" => Ok(RelayMessage::EndOfStoredEvents {
                subscription_id: string_at(arr, 1, "bad EOSE message")?,
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: arr.get(1).map(text_of).unwrap_or_default(),
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(arr, 1, "bad CLOSED message")?,
                message: arr.get(2).map(text_of).unwrap_or_default(),
            }),
            "OK" => {
                if arr.len() < 4 {
                    return Err(protocol("bad OK message"));
                }
                Ok(RelayMessage::Ok {
                    event_id: string_at(arr, 1, "bad OK event id")?,
                    accepted: arr[2]
                        .as_bool()
                        .ok_or_else(|| protocol("bad OK status"))?,
                    message: text_of(&arr[3]),
                })
            }
            other => Err(RelayError::Protocol(format!(
                "unknown relay message: {other}"
            ))),
        }
    }
}

fn string_at(arr: &[Value], index: usize, context: &str) -> Result<String, RelayError> {
    arr.get(index)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| protocol(context))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn protocol(message: &str) -> RelayError {
    RelayError::Protocol(message.to_string())
}
