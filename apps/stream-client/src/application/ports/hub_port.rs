//! Hub Port (Driven Port)
//!
//! Interface to a hub-style connection: RPC invocations, completions and
//! server-to-client streams multiplexed on one socket. The reconnecting
//! transport drives a [`HubConnector`]; the WebSocket implementation lives
//! in `infrastructure::hub::client`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::domain::connection::{AccessToken, HubProtocol, HubTransportType};

/// Hub method that opens the server push stream.
pub const START_STREAMING: &str = "StartStreaming";
/// Hub method that re-authenticates the open session.
pub const RENEW_TOKEN: &str = "RenewToken";
/// Hub method that asks the server to end the session.
pub const CLOSE_CONNECTION: &str = "CloseConnection";

/// Hub connection and session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The server rejected or garbled the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The requested physical transport is not available.
    #[error("unsupported transport: {0:?}")]
    UnsupportedTransport(HubTransportType),
    /// Socket level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// A hub message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A stream item arrived that is not a valid frame. Not terminal for
    /// the stream.
    #[error("invalid stream item: {0}")]
    InvalidItem(String),
    /// An invocation completed with an error.
    #[error("invocation failed: {0}")]
    Invocation(String),
    /// The server closed the connection with an error.
    #[error("server closed the connection: {0}")]
    ServerClosed(String),
    /// Nothing arrived from the server within the timeout.
    #[error("server timeout: no message received")]
    ServerTimeout,
    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Frame payload as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Text payload (base64 on the JSON protocol).
    Text(String),
    /// Binary payload (MessagePack protocol).
    Binary(Vec<u8>),
}

/// One item of the server push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Subscription the frame belongs to.
    pub reference_id: String,
    /// Wire format code (1 = JSON, 2 = Protobuf).
    pub payload_format: u8,
    /// Encoded payload.
    pub payload: FramePayload,
    /// Server sequence id.
    pub message_id: String,
}

/// Result of a `RenewToken` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RenewTokenResponse {
    /// Status code.
    #[serde(rename = "Status")]
    pub status: i64,
}

/// Items of an open push stream.
pub type FrameStream = BoxStream<'static, Result<RawFrame, HubError>>;

/// An open server push stream.
pub struct MessageStream {
    /// Invocation id, used to cancel the stream.
    pub id: String,
    /// Stream items. Ends when the server completes the stream.
    pub frames: FrameStream,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").field("id", &self.id).finish()
    }
}

/// Parameters of one connect attempt.
#[derive(Debug, Clone)]
pub struct HubConnectRequest {
    /// Connection URL including the query string.
    pub url: String,
    /// Token sent with the connect.
    pub access_token: Option<AccessToken>,
    /// Wire sub-protocol.
    pub protocol: HubProtocol,
    /// Physical transport.
    pub transport_type: HubTransportType,
    /// Skip the negotiate round trip.
    pub skip_negotiation: bool,
}

/// A live hub connection.
pub struct HubConnection {
    /// Operations on the session.
    pub session: Arc<dyn HubSession>,
    /// Resolves once the connection is gone: `None` for a graceful close,
    /// `Some` with the cause for an abrupt one.
    pub closed: oneshot::Receiver<Option<HubError>>,
}

/// Operations on a live hub session.
#[async_trait]
pub trait HubSession: Send + Sync {
    /// Invoke `StartStreaming` and subscribe to its items.
    async fn start_streaming(&self) -> Result<MessageStream, HubError>;

    /// Cancel an open stream.
    async fn cancel_stream(&self, stream_id: &str) -> Result<(), HubError>;

    /// Invoke `RenewToken`.
    async fn renew_token(&self, token: &AccessToken) -> Result<RenewTokenResponse, HubError>;

    /// Invoke `CloseConnection`.
    async fn close_connection(&self) -> Result<(), HubError>;

    /// Close the socket. Resolves the `closed` signal with `None`.
    async fn stop(&self);
}

/// Opens hub connections.
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Check if `transport_type` is available.
    fn supports(&self, transport_type: HubTransportType) -> bool;

    /// Open a connection and complete the handshake.
    async fn connect(&self, request: HubConnectRequest) -> Result<HubConnection, HubError>;
}
