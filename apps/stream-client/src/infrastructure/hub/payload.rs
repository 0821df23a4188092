//! Payload Normalization
//!
//! Turns a raw push-stream frame into the canonical envelope in two steps:
//!
//! 1. [`normalize`]: map `PayloadFormat` to a [`DataFormat`] and decode the
//!    payload to bytes (base64 on the JSON sub-protocol)
//! 2. [`parse`]: decode JSON payloads; pass protobuf bytes through
//!
//! Errors carry the raw payload so the failure can be logged in full.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::application::ports::{FramePayload, RawFrame};
use crate::domain::connection::{DataFormat, HubProtocol, MessageData, StreamingMessage};

/// A frame with its payload decoded to bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Subscription the message belongs to.
    pub reference_id: String,
    /// Server sequence id.
    pub message_id: String,
    /// Canonical format.
    pub data_format: DataFormat,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// Normalization and parsing failures.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// `PayloadFormat` is neither 1 nor 2.
    #[error("unknown payload format {format}")]
    UnknownFormat {
        /// The wire code.
        format: u8,
        /// Raw payload.
        payload: String,
    },

    /// The payload is not valid base64.
    #[error("invalid base64 payload: {source}")]
    Base64 {
        /// Decoder error.
        source: base64::DecodeError,
        /// Raw payload.
        payload: String,
    },

    /// A JSON payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {source}")]
    Utf8 {
        /// Decoder error.
        source: std::string::FromUtf8Error,
    },

    /// A JSON payload did not parse.
    #[error("payload is not valid JSON: {source}")]
    Json {
        /// Parser error.
        source: serde_json::Error,
        /// Raw payload.
        payload: String,
    },
}

impl PayloadError {
    /// The raw payload that failed, lossily decoded for logging.
    #[must_use]
    pub fn payload(&self) -> String {
        match self {
            Self::UnknownFormat { payload, .. }
            | Self::Base64 { payload, .. }
            | Self::Json { payload, .. } => payload.clone(),
            Self::Utf8 { source } => String::from_utf8_lossy(source.as_bytes()).into_owned(),
        }
    }
}

fn describe(payload: &FramePayload) -> String {
    match payload {
        FramePayload::Text(text) => text.clone(),
        FramePayload::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Map the wire format and decode the payload to bytes.
///
/// # Errors
///
/// Returns an error for an unknown `PayloadFormat` or invalid base64.
pub fn normalize(frame: RawFrame, protocol: HubProtocol) -> Result<NormalizedMessage, PayloadError> {
    let Some(data_format) = DataFormat::from_payload_format(frame.payload_format) else {
        return Err(PayloadError::UnknownFormat {
            format: frame.payload_format,
            payload: describe(&frame.payload),
        });
    };

    let data = match frame.payload {
        FramePayload::Text(text) if protocol.encodes_binary_as_base64() => BASE64
            .decode(text.as_bytes())
            .map_err(|source| PayloadError::Base64 {
                source,
                payload: text.clone(),
            })?,
        FramePayload::Text(text) => text.into_bytes(),
        FramePayload::Binary(bytes) => bytes,
    };

    Ok(NormalizedMessage {
        reference_id: frame.reference_id,
        message_id: frame.message_id,
        data_format,
        data,
    })
}

/// Decode a normalized message into the canonical envelope.
///
/// # Errors
///
/// Returns an error if a JSON payload is not UTF-8 or does not parse.
pub fn parse(message: NormalizedMessage) -> Result<StreamingMessage, PayloadError> {
    let data = match message.data_format {
        DataFormat::Json => {
            let text = String::from_utf8(message.data).map_err(|source| PayloadError::Utf8 { source })?;
            let value = serde_json::from_str(&text)
                .map_err(|source| PayloadError::Json { source, payload: text })?;
            MessageData::Json(value)
        }
        DataFormat::Protobuf => MessageData::Protobuf(message.data),
    };

    Ok(StreamingMessage {
        reference_id: message.reference_id,
        message_id: message.message_id,
        data_format: message.data_format,
        data,
    })
}

/// Normalize and parse in one go.
///
/// # Errors
///
/// See [`normalize`] and [`parse`].
pub fn decode_frame(frame: RawFrame, protocol: HubProtocol) -> Result<StreamingMessage, PayloadError> {
    parse(normalize(frame, protocol)?)
}
