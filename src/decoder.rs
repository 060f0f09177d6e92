//! Feed frame decoding
//!
//! Inbound frames are JSON objects discriminated by their `type` field:
//!
//! - `{"type":"auth","success":bool,"message"?:string}`
//! - `{"type":"update","data":[record,...],"timestamp":ISO8601}`
//! - `{"type":"ping"}`
//!
//! Anything else with valid JSON object syntax is [`FeedMessage::Unrecognized`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{errors::DecodeError, models::RawVesselRecord};

/// Typed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    AuthAck {
        success: bool,
        reason: Option<String>,
    },
    VesselUpdate {
        records: Vec<RawVesselRecord>,
        /// Frame timestamp, `None` when upstream omitted it
        timestamp: Option<DateTime<Utc>>,
    },
    Heartbeat,
    Unrecognized {
        raw: String,
    },
}

/// Outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Pong,
}

impl ClientFrame {
    pub fn encode(&self) -> String {
        match self {
            ClientFrame::Pong => r#"{"type":"pong"}"#.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct AuthFrame {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct UpdateFrame {
    #[serde(default)]
    data: Option<Vec<RawVesselRecord>>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<FeedMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Syntax)?;

    let Value::Object(ref object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let frame_type = object
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match frame_type.as_deref() {
        Some("auth") => {
            let frame: AuthFrame = serde_json::from_value(value).map_err(|source| {
                DecodeError::Malformed {
                    frame_type: "auth".to_string(),
                    source,
                }
            })?;
            Ok(FeedMessage::AuthAck {
                success: frame.success,
                reason: frame.message,
            })
        }
        Some("update") => {
            let frame: UpdateFrame = serde_json::from_value(value).map_err(|source| {
                DecodeError::Malformed {
                    frame_type: "update".to_string(),
                    source,
                }
            })?;
            Ok(FeedMessage::VesselUpdate {
                records: frame.data.unwrap_or_default(),
                timestamp: frame.timestamp,
            })
        }
        Some("ping") => Ok(FeedMessage::Heartbeat),
        _ => Ok(FeedMessage::Unrecognized {
            raw: text.to_string(),
        }),
    }
}
