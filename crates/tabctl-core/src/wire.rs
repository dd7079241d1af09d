use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::WindowId;

/// Size of the frame header carrying the body length.
pub const LENGTH_PREFIX_BYTES: usize = 4;
/// The browser refuses host messages above 1 MiB.
pub const MAX_OUTBOUND_FRAME_BYTES: usize = 1024 * 1024;
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Command,
    /// Replies from older controllers carry no `type`; they are terminal.
    #[default]
    Results,
    Push,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Results => "results",
            MessageKind::Push => "push",
        }
    }

    /// A terminal message retires the handler registered for its id.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageKind::Results)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_correlation_id"
    )]
    pub id: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub results: Value,
}

impl Message {
    pub fn command(id: u64, name: &str, args: Value) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Command,
            command: Some(name.to_string()),
            args,
            results: Value::Null,
        }
    }

    pub fn results(id: u64, results: Value) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Results,
            command: None,
            args: Value::Null,
            results,
        }
    }

    pub fn push(id: u64, results: Value) -> Self {
        Self {
            kind: MessageKind::Push,
            ..Self::results(id, results)
        }
    }
}

/// Accepts `12`, `"12"` or `null`.
fn deserialize_correlation_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid correlation id: {number}"))),
        Value::String(text) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| serde::de::Error::custom(format!("invalid correlation id '{text}': {err}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected integer correlation id, got {other}"
        ))),
    }
}

/// Extracts the window id from a window-close push: either `{"windowId": n}`
/// or a bare integer.
pub fn window_id_from_value(value: &Value) -> Option<WindowId> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::Object(map) => map
            .get("windowId")
            .or_else(|| map.get("window_id"))
            .and_then(|inner| inner.as_i64()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Serializes `value` as JSON behind a native-endian `u32` length prefix.
pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if body.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: body.len(),
            max: max_frame_bytes,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| FrameError::OversizedFrame {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_ne_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads the body length out of a frame header.
pub fn frame_len(
    prefix: [u8; LENGTH_PREFIX_BYTES],
    max_frame_bytes: usize,
) -> Result<usize, FrameError> {
    let size = u32::from_ne_bytes(prefix) as usize;
    if size > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size,
            max: max_frame_bytes,
        });
    }
    Ok(size)
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(body).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Decodes one complete frame (header and body) held in memory.
pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    if bytes.len() < LENGTH_PREFIX_BYTES {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_BYTES,
            actual: bytes.len(),
        });
    }
    let (prefix, body) = bytes.split_at(LENGTH_PREFIX_BYTES);
    let mut header = [0u8; LENGTH_PREFIX_BYTES];
    header.copy_from_slice(prefix);
    let expected = frame_len(header, max_frame_bytes)?;
    if body.len() != expected {
        return Err(FrameError::Truncated {
            expected,
            actual: body.len(),
        });
    }
    decode_body(body)
}
