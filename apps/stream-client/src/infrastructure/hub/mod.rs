//! Hub Connection Adapters
//!
//! The primary reconnecting transport and everything under it:
//!
//! - **transport**: connection state machine, reconnect, renewal, stop
//! - **reconnect**: retry ladder
//! - **payload**: frame normalization and parsing
//! - **auth**: `RenewToken` status handling
//! - **client**: WebSocket [`HubConnector`](crate::application::ports::HubConnector)
//! - **codec**: JSON and MessagePack hub wire formats
//! - **keepalive**: ping interval and server timeout

pub mod auth;
pub mod client;
pub mod codec;
pub mod keepalive;
pub mod payload;
pub mod reconnect;
pub mod transport;

pub use auth::{RenewAction, RenewStatus};
pub use client::{WsHubConnector, WsHubSession, websocket_url};
pub use codec::{CodecError, HubCodec, HubMessage, JsonHubCodec, MsgPackHubCodec};
pub use keepalive::{KeepAliveConfig, KeepAliveEvent, KeepAliveMonitor, KeepAliveState};
pub use payload::{NormalizedMessage, PayloadError, decode_frame, normalize, parse};
pub use reconnect::{RETRY_LADDER_MS, RetryPolicy};
pub use transport::{HubTransport, HubTransportBuilder, with_message_id};
