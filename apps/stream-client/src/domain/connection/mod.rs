//! Connection Types
//!
//! Canonical types every transport speaks, regardless of the wire protocol
//! underneath:
//!
//! - [`ConnectionState`]: the single state exposed to callers
//! - [`StreamingMessage`]: the envelope delivered for every server frame
//! - [`SessionContext`]: token, expiry, context id and resume position
//! - [`TransportKind`]: names of the interchangeable transports

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// Canonical connection state mirrored from the active transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Nothing has happened yet.
    #[default]
    Initializing,
    /// A connect is in flight.
    Connecting,
    /// The server push stream is live.
    Connected,
    /// The connection dropped and a retry is pending or in flight.
    Reconnecting,
    /// The connection is closed.
    Disconnected,
    /// The transport gave up.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    /// Numeric code used for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::Disconnected => 4,
            Self::Failed => 5,
        }
    }

    /// Check if the server push stream is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Message Envelope
// =============================================================================

/// Canonical data format of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// UTF-8 JSON document.
    Json,
    /// Protobuf bytes, passed through unparsed.
    Protobuf,
}

impl DataFormat {
    /// Map the wire `PayloadFormat` code (1 = JSON, 2 = Protobuf).
    #[must_use]
    pub const fn from_payload_format(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Json),
            2 => Some(Self::Protobuf),
            _ => None,
        }
    }

    /// Get the format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Protobuf => "protobuf",
        }
    }
}

/// Message payload: a parsed JSON value or raw protobuf bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageData {
    /// Parsed JSON document.
    Json(serde_json::Value),
    /// Raw bytes for the caller's protobuf decoder.
    Protobuf(Vec<u8>),
}

/// The envelope delivered to the caller for every server frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamingMessage {
    /// Subscription the message belongs to.
    pub reference_id: String,
    /// Server sequence id; used to resume after a reconnect.
    pub message_id: String,
    /// Format of `data`.
    pub data_format: DataFormat,
    /// Payload.
    pub data: MessageData,
}

// =============================================================================
// Session Context
// =============================================================================

/// Bearer token used to authenticate the streaming session.
///
/// A leading `"BEARER "` supplied by the caller is stripped. `Debug` output
/// never contains the token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token, dropping a leading `"BEARER "` prefix.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match raw.strip_prefix("BEARER ") {
            Some(stripped) => Self(stripped.to_string()),
            None => Self(raw),
        }
    }

    /// Get the bare token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Authentication and resume state of one logical streaming session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Current bearer token.
    pub auth_token: Option<AccessToken>,
    /// Token expiry, epoch milliseconds.
    pub auth_expiry: Option<i64>,
    /// Server-assigned session scope.
    pub context_id: Option<String>,
    /// Id of the last delivered message; present only while resumable.
    pub last_message_id: Option<String>,
}

impl SessionContext {
    /// Replace token, context and expiry together.
    pub fn update(&mut self, auth_token: AccessToken, context_id: &str, auth_expiry: i64) {
        self.auth_token = Some(auth_token);
        self.context_id = Some(context_id.to_string());
        self.auth_expiry = Some(auth_expiry);
    }

    /// A missing expiry counts as expired.
    #[must_use]
    pub fn is_token_expired(&self, now_ms: i64) -> bool {
        self.auth_expiry.is_none_or(|expiry| expiry < now_ms)
    }

    /// Check if a previous session can be resumed.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        self.last_message_id.is_some()
    }
}

// =============================================================================
// Transport Kinds
// =============================================================================

/// Names of the interchangeable transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Plain WebSocket transport.
    #[serde(rename = "plainWebSockets")]
    PlainWebSocket,
    /// Hub connection over WebSockets.
    #[serde(rename = "hubWebSockets")]
    HubWebSocket,
    /// Hub connection over HTTP long polling.
    #[serde(rename = "hubLongPolling")]
    HubLongPolling,
    /// Legacy connection library over WebSockets.
    #[serde(rename = "legacyWebSockets")]
    LegacyWebSocket,
    /// Legacy connection library over long polling.
    #[serde(rename = "legacyLongPolling")]
    LegacyLongPolling,
}

impl TransportKind {
    /// Candidates used when the caller gives no list.
    pub const DEFAULTS: [Self; 2] = [Self::PlainWebSocket, Self::LegacyWebSocket];

    /// Every known transport.
    pub const ALL: [Self; 5] = [
        Self::PlainWebSocket,
        Self::HubWebSocket,
        Self::HubLongPolling,
        Self::LegacyWebSocket,
        Self::LegacyLongPolling,
    ];

    /// Get the configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlainWebSocket => "plainWebSockets",
            Self::HubWebSocket => "hubWebSockets",
            Self::HubLongPolling => "hubLongPolling",
            Self::LegacyWebSocket => "legacyWebSockets",
            Self::LegacyLongPolling => "legacyLongPolling",
        }
    }

    /// Parse a configuration name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire sub-protocol of a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HubProtocol {
    /// JSON text records; frame payloads travel as base64.
    #[default]
    Json,
    /// MessagePack binary records; frame payloads travel as raw bytes.
    MessagePack,
}

impl HubProtocol {
    /// Protocol name used in the handshake.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "messagepack",
        }
    }

    /// Check if binary payloads are base64 encoded on this protocol.
    #[must_use]
    pub const fn encodes_binary_as_base64(&self) -> bool {
        matches!(self, Self::Json)
    }

    /// Parse a protocol name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "messagepack" | "msgpack" => Some(Self::MessagePack),
            _ => None,
        }
    }
}

/// Physical transport under a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubTransportType {
    /// WebSockets.
    WebSockets,
    /// HTTP long polling.
    LongPolling,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, Some(DataFormat::Json) ; "json")]
    #[test_case(2, Some(DataFormat::Protobuf) ; "protobuf")]
    #[test_case(0, None ; "zero")]
    #[test_case(3, None ; "unknown")]
    fn payload_format_mapping(code: u8, expected: Option<DataFormat>) {
        assert_eq!(DataFormat::from_payload_format(code), expected);
    }

    #[test_case("plainWebSockets", Some(TransportKind::PlainWebSocket))]
    #[test_case("HUBWEBSOCKETS", Some(TransportKind::HubWebSocket))]
    #[test_case(" hubLongPolling ", Some(TransportKind::HubLongPolling))]
    #[test_case("legacywebsockets", Some(TransportKind::LegacyWebSocket))]
    #[test_case("legacyLongPolling", Some(TransportKind::LegacyLongPolling))]
    #[test_case("serverSentEvents", None)]
    fn transport_kind_parsing(name: &str, expected: Option<TransportKind>) {
        assert_eq!(TransportKind::parse(name), expected);
    }

    #[test]
    fn access_token_strips_bearer_prefix() {
        assert_eq!(AccessToken::new("BEARER abc").as_str(), "abc");
        assert_eq!(AccessToken::new("abc").as_str(), "abc");
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn token_expiry() {
        let mut session = SessionContext::default();
        assert!(session.is_token_expired(1_000));

        session.update(AccessToken::new("t"), "ctx", 2_000);
        assert!(!session.is_token_expired(1_000));
        assert!(!session.is_token_expired(2_000));
        assert!(session.is_token_expired(2_001));
    }

    #[test]
    fn envelope_serializes_with_wire_names() {
        let message = StreamingMessage {
            reference_id: "ref".to_string(),
            message_id: "7".to_string(),
            data_format: DataFormat::Json,
            data: MessageData::Json(serde_json::json!({"a": 1})),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["ReferenceId"], "ref");
        assert_eq!(value["MessageId"], "7");
        assert_eq!(value["DataFormat"], "json");
        assert_eq!(value["Data"]["a"], 1);
    }

    #[test]
    fn protocol_names() {
        assert_eq!(HubProtocol::default(), HubProtocol::Json);
        assert_eq!(HubProtocol::parse("MessagePack"), Some(HubProtocol::MessagePack));
        assert_eq!(HubProtocol::parse("xml"), None);
        assert!(HubProtocol::Json.encodes_binary_as_base64());
        assert!(!HubProtocol::MessagePack.encodes_binary_as_base64());
    }
}
