//! Hub Wire Codec
//!
//! Framing and (de)serialization of hub messages.
//!
//! - **JSON protocol**: one JSON object per record, each terminated by the
//!   `0x1E` record separator; several records may share a text frame
//! - **`MessagePack` protocol**: each message is an array prefixed with its
//!   length as a little-endian base-128 varint; several may share a binary
//!   frame
//!
//! The handshake is always JSON, in either protocol.
//!
//! # Message types
//!
//! | Code | Message            | `MessagePack` layout                         |
//! |------|--------------------|----------------------------------------------|
//! | 1    | Invocation         | `[1, headers, id, target, args, streamIds]`  |
//! | 2    | StreamItem         | `[2, headers, id, item]`                     |
//! | 3    | Completion         | `[3, headers, id, kind, value?]`             |
//! | 4    | StreamInvocation   | `[4, headers, id, target, args, streamIds]`  |
//! | 5    | CancelInvocation   | `[5, headers, id]`                           |
//! | 6    | Ping               | `[6]`                                        |
//! | 7    | Close              | `[7, error, allowReconnect]`                 |

use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;

use crate::application::ports::{FramePayload, RawFrame, RenewTokenResponse};
use crate::domain::connection::HubProtocol;

/// Record separator terminating every JSON record.
pub const RECORD_SEPARATOR: u8 = 0x1e;

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const CANCEL_INVOCATION: u8 = 5;
const PING: u8 = 6;
const CLOSE: u8 = 7;

const COMPLETION_ERROR: u8 = 1;
const COMPLETION_VOID: u8 = 2;
const COMPLETION_RESULT: u8 = 3;

/// Longest varint length prefix accepted (lengths up to 2^35).
const MAX_VARINT_BYTES: usize = 5;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// `MessagePack` encoding failed.
    #[error("`MessagePack` encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// `MessagePack` decoding failed.
    #[error("`MessagePack` decode error: {0}")]
    MsgPackDecode(#[from] rmpv::decode::Error),

    /// Message type code outside 1..=7.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    /// A message is missing a field or has one of the wrong type.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Data ended in the middle of a message.
    #[error("incomplete message")]
    Incomplete,

    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame of the wrong kind arrived for the negotiated protocol.
    #[error("{0} frame received on the {1} protocol")]
    UnexpectedFrame(&'static str, &'static str),
}

// =============================================================================
// Messages
// =============================================================================

/// A value carried inside a hub message, in the protocol it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum HubValue {
    /// JSON protocol value.
    Json(serde_json::Value),
    /// `MessagePack` protocol value.
    MsgPack(rmpv::Value),
}

impl From<&str> for HubValue {
    fn from(value: &str) -> Self {
        Self::Json(serde_json::Value::String(value.to_string()))
    }
}

impl Serialize for HubValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            Self::MsgPack(value) => value.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonFrame {
    reference_id: String,
    payload_format: u8,
    payload: String,
    message_id: String,
}

impl HubValue {
    /// Interpret the value as a push-stream frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or has the wrong type.
    pub fn into_frame(self) -> Result<RawFrame, CodecError> {
        match self {
            Self::Json(value) => {
                let frame: JsonFrame = serde_json::from_value(value)?;
                Ok(RawFrame {
                    reference_id: frame.reference_id,
                    payload_format: frame.payload_format,
                    payload: FramePayload::Text(frame.payload),
                    message_id: frame.message_id,
                })
            }
            Self::MsgPack(value) => {
                let payload = match map_field(&value, "Payload")? {
                    rmpv::Value::Binary(bytes) => FramePayload::Binary(bytes.clone()),
                    rmpv::Value::String(text) => FramePayload::Text(
                        text.as_str()
                            .ok_or_else(|| invalid("Payload is not valid UTF-8"))?
                            .to_string(),
                    ),
                    other => return Err(invalid(format!("unexpected Payload type: {other}"))),
                };
                let payload_format = map_field(&value, "PayloadFormat")?
                    .as_u64()
                    .and_then(|code| u8::try_from(code).ok())
                    .ok_or_else(|| invalid("PayloadFormat is not a small integer"))?;

                Ok(RawFrame {
                    reference_id: map_string(&value, "ReferenceId")?,
                    payload_format,
                    payload,
                    message_id: map_string(&value, "MessageId")?,
                })
            }
        }
    }

    /// Interpret the value as a `RenewToken` result.
    ///
    /// # Errors
    ///
    /// Returns an error if `Status` is missing or not an integer.
    pub fn into_renew_response(self) -> Result<RenewTokenResponse, CodecError> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::MsgPack(value) => {
                let status = map_field(&value, "Status")?
                    .as_i64()
                    .ok_or_else(|| invalid("Status is not an integer"))?;
                Ok(RenewTokenResponse { status })
            }
        }
    }
}

fn invalid(message: impl Into<String>) -> CodecError {
    CodecError::InvalidFormat(message.into())
}

fn map_field<'a>(value: &'a rmpv::Value, key: &str) -> Result<&'a rmpv::Value, CodecError> {
    value
        .as_map()
        .ok_or_else(|| invalid("expected a map"))?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
        .ok_or_else(|| invalid(format!("missing field {key}")))
}

fn map_string(value: &rmpv::Value, key: &str) -> Result<String, CodecError> {
    let field = map_field(value, key)?;
    field
        .as_str()
        .map(str::to_string)
        .or_else(|| field.as_u64().map(|n| n.to_string()))
        .ok_or_else(|| invalid(format!("{key} is not a string")))
}

/// A hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method; a completion follows when `invocation_id` is set.
    Invocation {
        /// Correlates the completion.
        invocation_id: Option<String>,
        /// Method name.
        target: String,
        /// Arguments.
        arguments: Vec<HubValue>,
    },
    /// One item of a server-to-client stream.
    StreamItem {
        /// Stream invocation id.
        invocation_id: String,
        /// Item.
        item: HubValue,
    },
    /// Result of an invocation, or end of a stream.
    Completion {
        /// Invocation id.
        invocation_id: String,
        /// Failure description.
        error: Option<String>,
        /// Return value.
        result: Option<HubValue>,
    },
    /// Call a method that streams its results.
    StreamInvocation {
        /// Stream id.
        invocation_id: String,
        /// Method name.
        target: String,
        /// Arguments.
        arguments: Vec<HubValue>,
    },
    /// Cancel a stream.
    CancelInvocation {
        /// Stream id.
        invocation_id: String,
    },
    /// Keep-alive.
    Ping,
    /// The peer is closing the connection.
    Close {
        /// Why, when abnormal.
        error: Option<String>,
        /// Whether the peer allows reconnecting.
        allow_reconnect: bool,
    },
}

// =============================================================================
// Handshake
// =============================================================================

#[derive(Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

/// Handshake request for `protocol`, record separator included.
#[must_use]
pub fn handshake_request(protocol: HubProtocol) -> String {
    let mut request = json!({"protocol": protocol.name(), "version": 1}).to_string();
    request.push(char::from(RECORD_SEPARATOR));
    request
}

/// Parse the handshake response at the start of `data`.
///
/// Returns the number of bytes consumed; anything after belongs to the
/// negotiated protocol.
///
/// # Errors
///
/// Returns an error if the response is incomplete, malformed, or carries an
/// error.
pub fn parse_handshake_response(data: &[u8]) -> Result<usize, CodecError> {
    let end = data
        .iter()
        .position(|byte| *byte == RECORD_SEPARATOR)
        .ok_or(CodecError::Incomplete)?;
    let response: HandshakeResponse = serde_json::from_slice(&data[..end])?;
    if let Some(error) = response.error {
        return Err(CodecError::HandshakeRejected(error));
    }
    Ok(end + 1)
}

// =============================================================================
// JSON Protocol
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRecord {
    #[serde(rename = "type")]
    kind: u64,
    invocation_id: Option<String>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
    item: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

/// JSON hub protocol codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHubCodec;

impl JsonHubCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode one message as a terminated record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &HubMessage) -> Result<String, CodecError> {
        let value = match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut value = json!({"type": INVOCATION, "target": target, "arguments": arguments});
                if let Some(id) = invocation_id {
                    value["invocationId"] = json!(id);
                }
                value
            }
            HubMessage::StreamItem {
                invocation_id,
                item,
            } => json!({"type": STREAM_ITEM, "invocationId": invocation_id, "item": item}),
            HubMessage::Completion {
                invocation_id,
                error,
                result,
            } => {
                let mut value = json!({"type": COMPLETION, "invocationId": invocation_id});
                if let Some(error) = error {
                    value["error"] = json!(error);
                } else if let Some(result) = result {
                    value["result"] = serde_json::to_value(result)?;
                }
                value
            }
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => json!({
                "type": STREAM_INVOCATION,
                "invocationId": invocation_id,
                "target": target,
                "arguments": arguments,
            }),
            HubMessage::CancelInvocation { invocation_id } => {
                json!({"type": CANCEL_INVOCATION, "invocationId": invocation_id})
            }
            HubMessage::Ping => json!({"type": PING}),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => json!({"type": CLOSE, "error": error, "allowReconnect": allow_reconnect}),
        };

        let mut record = serde_json::to_string(&value)?;
        record.push(char::from(RECORD_SEPARATOR));
        Ok(record)
    }

    /// Decode every record in a text frame.
    ///
    /// Records of unknown type are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a record is malformed.
    pub fn decode(&self, text: &str) -> Result<Vec<HubMessage>, CodecError> {
        let mut messages = Vec::new();
        for record in text.split(char::from(RECORD_SEPARATOR)) {
            if record.trim().is_empty() {
                continue;
            }
            let record: JsonRecord = serde_json::from_str(record)?;
            match Self::decode_record(record) {
                Ok(message) => messages.push(message),
                Err(CodecError::UnknownMessageType(kind)) => {
                    tracing::debug!(kind, "Skipping hub message of unknown type");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    fn decode_record(record: JsonRecord) -> Result<HubMessage, CodecError> {
        let required_id = |id: Option<String>| id.ok_or_else(|| invalid("missing invocationId"));

        let message = match u8::try_from(record.kind).unwrap_or(u8::MAX) {
            INVOCATION => HubMessage::Invocation {
                invocation_id: record.invocation_id,
                target: record.target.ok_or_else(|| invalid("missing target"))?,
                arguments: record.arguments.into_iter().map(HubValue::Json).collect(),
            },
            STREAM_ITEM => HubMessage::StreamItem {
                invocation_id: required_id(record.invocation_id)?,
                item: HubValue::Json(record.item.unwrap_or(serde_json::Value::Null)),
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: required_id(record.invocation_id)?,
                error: record.error,
                result: record.result.map(HubValue::Json),
            },
            STREAM_INVOCATION => HubMessage::StreamInvocation {
                invocation_id: required_id(record.invocation_id)?,
                target: record.target.ok_or_else(|| invalid("missing target"))?,
                arguments: record.arguments.into_iter().map(HubValue::Json).collect(),
            },
            CANCEL_INVOCATION => HubMessage::CancelInvocation {
                invocation_id: required_id(record.invocation_id)?,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: record.error,
                allow_reconnect: record.allow_reconnect,
            },
            _ => return Err(CodecError::UnknownMessageType(record.kind)),
        };
        Ok(message)
    }
}

// =============================================================================
// MessagePack Protocol
// =============================================================================

/// `MessagePack` hub protocol codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackHubCodec;

type Headers = HashMap<String, String>;

impl MsgPackHubCodec {
    /// Create a new `MessagePack` codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode one message with its length prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &HubMessage) -> Result<Vec<u8>, CodecError> {
        let no_streams: Vec<String> = Vec::new();
        let body = match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => rmp_serde::to_vec(&(
                INVOCATION,
                Headers::new(),
                invocation_id,
                target,
                arguments,
                &no_streams,
            ))?,
            HubMessage::StreamItem {
                invocation_id,
                item,
            } => rmp_serde::to_vec(&(STREAM_ITEM, Headers::new(), invocation_id, item))?,
            HubMessage::Completion {
                invocation_id,
                error,
                result,
            } => match (error, result) {
                (Some(error), _) => rmp_serde::to_vec(&(
                    COMPLETION,
                    Headers::new(),
                    invocation_id,
                    COMPLETION_ERROR,
                    error,
                ))?,
                (None, Some(result)) => rmp_serde::to_vec(&(
                    COMPLETION,
                    Headers::new(),
                    invocation_id,
                    COMPLETION_RESULT,
                    result,
                ))?,
                (None, None) => rmp_serde::to_vec(&(
                    COMPLETION,
                    Headers::new(),
                    invocation_id,
                    COMPLETION_VOID,
                ))?,
            },
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => rmp_serde::to_vec(&(
                STREAM_INVOCATION,
                Headers::new(),
                invocation_id,
                target,
                arguments,
                &no_streams,
            ))?,
            HubMessage::CancelInvocation { invocation_id } => {
                rmp_serde::to_vec(&(CANCEL_INVOCATION, Headers::new(), invocation_id))?
            }
            HubMessage::Ping => rmp_serde::to_vec(&(PING,))?,
            HubMessage::Close {
                error,
                allow_reconnect,
            } => rmp_serde::to_vec(&(CLOSE, error, allow_reconnect))?,
        };

        let mut framed = Vec::with_capacity(body.len() + MAX_VARINT_BYTES);
        write_varint(body.len(), &mut framed);
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Decode every message in a binary frame.
    ///
    /// Messages of unknown type are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a message is truncated or malformed.
    pub fn decode(&self, mut data: &[u8]) -> Result<Vec<HubMessage>, CodecError> {
        let mut messages = Vec::new();
        while !data.is_empty() {
            let (length, header) = read_varint(data)?;
            let end = header
                .checked_add(length)
                .filter(|end| *end <= data.len())
                .ok_or(CodecError::Incomplete)?;
            let mut body = &data[header..end];
            let value = rmpv::decode::read_value(&mut body)?;
            data = &data[end..];

            match Self::decode_value(value) {
                Ok(message) => messages.push(message),
                Err(CodecError::UnknownMessageType(kind)) => {
                    tracing::debug!(kind, "Skipping hub message of unknown type");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    fn decode_value(value: rmpv::Value) -> Result<HubMessage, CodecError> {
        let rmpv::Value::Array(mut fields) = value else {
            return Err(invalid("message is not an array"));
        };
        if fields.is_empty() {
            return Err(invalid("empty message array"));
        }
        let kind = fields[0]
            .as_u64()
            .ok_or_else(|| invalid("message type is not an integer"))?;
        // Drop the type; positions below are relative to the remaining fields.
        fields.remove(0);
        let mut fields = fields.into_iter();
        let mut next = |name: &str| fields.next().ok_or_else(|| invalid(format!("missing {name}")));

        let message = match u8::try_from(kind).unwrap_or(u8::MAX) {
            INVOCATION => {
                next("headers")?;
                let invocation_id = optional_string(next("invocation id")?)?;
                let target = required_string(next("target")?)?;
                let arguments = into_array(next("arguments")?)?;
                HubMessage::Invocation {
                    invocation_id,
                    target,
                    arguments: arguments.into_iter().map(HubValue::MsgPack).collect(),
                }
            }
            STREAM_ITEM => {
                next("headers")?;
                let invocation_id = required_string(next("invocation id")?)?;
                let item = next("item")?;
                HubMessage::StreamItem {
                    invocation_id,
                    item: HubValue::MsgPack(item),
                }
            }
            COMPLETION => {
                next("headers")?;
                let invocation_id = required_string(next("invocation id")?)?;
                let result_kind = next("result kind")?
                    .as_u64()
                    .ok_or_else(|| invalid("result kind is not an integer"))?;
                match u8::try_from(result_kind).unwrap_or(u8::MAX) {
                    COMPLETION_ERROR => HubMessage::Completion {
                        invocation_id,
                        error: Some(required_string(next("error")?)?),
                        result: None,
                    },
                    COMPLETION_VOID => HubMessage::Completion {
                        invocation_id,
                        error: None,
                        result: None,
                    },
                    COMPLETION_RESULT => HubMessage::Completion {
                        invocation_id,
                        error: None,
                        result: Some(HubValue::MsgPack(next("result")?)),
                    },
                    other => return Err(invalid(format!("unknown result kind {other}"))),
                }
            }
            STREAM_INVOCATION => {
                next("headers")?;
                let invocation_id = required_string(next("invocation id")?)?;
                let target = required_string(next("target")?)?;
                let arguments = into_array(next("arguments")?)?;
                HubMessage::StreamInvocation {
                    invocation_id,
                    target,
                    arguments: arguments.into_iter().map(HubValue::MsgPack).collect(),
                }
            }
            CANCEL_INVOCATION => {
                next("headers")?;
                HubMessage::CancelInvocation {
                    invocation_id: required_string(next("invocation id")?)?,
                }
            }
            PING => HubMessage::Ping,
            CLOSE => {
                let error = optional_string(next("error")?)?;
                let allow_reconnect = fields_bool(next("allow reconnect").ok());
                HubMessage::Close {
                    error,
                    allow_reconnect,
                }
            }
            _ => return Err(CodecError::UnknownMessageType(kind)),
        };
        Ok(message)
    }
}

fn fields_bool(value: Option<rmpv::Value>) -> bool {
    value.and_then(|v| v.as_bool()).unwrap_or(false)
}

fn required_string(value: rmpv::Value) -> Result<String, CodecError> {
    optional_string(value)?.ok_or_else(|| invalid("expected a string"))
}

fn optional_string(value: rmpv::Value) -> Result<Option<String>, CodecError> {
    match value {
        rmpv::Value::Nil => Ok(None),
        rmpv::Value::String(text) => text
            .into_str()
            .map(Some)
            .ok_or_else(|| invalid("string is not valid UTF-8")),
        other => Err(invalid(format!("expected a string, got {other}"))),
    }
}

fn into_array(value: rmpv::Value) -> Result<Vec<rmpv::Value>, CodecError> {
    match value {
        rmpv::Value::Array(items) => Ok(items),
        other => Err(invalid(format!("expected an array, got {other}"))),
    }
}

fn write_varint(mut value: usize, out: &mut Vec<u8>) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Read a length prefix; returns `(length, prefix bytes)`.
fn read_varint(data: &[u8]) -> Result<(usize, usize), CodecError> {
    let mut length = 0usize;
    for (index, byte) in data.iter().take(MAX_VARINT_BYTES).enumerate() {
        length |= usize::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok((length, index + 1));
        }
    }
    if data.len() < MAX_VARINT_BYTES {
        Err(CodecError::Incomplete)
    } else {
        Err(invalid("length prefix too long"))
    }
}

// =============================================================================
// Protocol Selection
// =============================================================================

/// An encoded message ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedMessage {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Codec for the negotiated protocol.
#[derive(Debug, Clone, Copy)]
pub enum HubCodec {
    /// JSON protocol.
    Json(JsonHubCodec),
    /// `MessagePack` protocol.
    MessagePack(MsgPackHubCodec),
}

impl HubCodec {
    /// Codec for `protocol`.
    #[must_use]
    pub const fn for_protocol(protocol: HubProtocol) -> Self {
        match protocol {
            HubProtocol::Json => Self::Json(JsonHubCodec::new()),
            HubProtocol::MessagePack => Self::MessagePack(MsgPackHubCodec::new()),
        }
    }

    /// Encode one message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &HubMessage) -> Result<EncodedMessage, CodecError> {
        match self {
            Self::Json(codec) => codec.encode(message).map(EncodedMessage::Text),
            Self::MessagePack(codec) => codec.encode(message).map(EncodedMessage::Binary),
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error on the `MessagePack` protocol or for malformed records.
    pub fn decode_text(&self, text: &str) -> Result<Vec<HubMessage>, CodecError> {
        match self {
            Self::Json(codec) => codec.decode(text),
            Self::MessagePack(_) => Err(CodecError::UnexpectedFrame("text", "messagepack")),
        }
    }

    /// Decode a binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error on the JSON protocol or for malformed messages.
    pub fn decode_binary(&self, data: &[u8]) -> Result<Vec<HubMessage>, CodecError> {
        match self {
            Self::Json(_) => Err(CodecError::UnexpectedFrame("binary", "json")),
            Self::MessagePack(codec) => codec.decode(data),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
