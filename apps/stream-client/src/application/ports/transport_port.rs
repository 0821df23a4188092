//! Transport Port (Driven Port)
//!
//! The capability set every streaming transport exposes, and the builder
//! the connection facade uses to probe and instantiate candidates.

use std::sync::Arc;

use crate::domain::connection::{
    ConnectionState, HubProtocol, HubTransportType, StreamingMessage, TransportKind,
};

/// Handler for delivered envelopes.
pub type ReceivedCallback = Arc<dyn Fn(StreamingMessage) + Send + Sync>;
/// Handler for state transitions.
pub type StateChangedCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
/// Handler for authentication rejections.
pub type UnauthorizedCallback = Arc<dyn Fn() + Send + Sync>;
/// Handler for slow-connection warnings.
pub type ConnectionSlowCallback = Arc<dyn Fn() + Send + Sync>;
/// Handler invoked once a transport has started.
pub type StartedCallback = Arc<dyn Fn() + Send + Sync>;
/// Handler a transport invokes when it fails for good.
pub type TransportFailureCallback = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Why a transport gave up. Reported to the facade, which moves on to the
/// next candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The initial connect failed.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    /// A frame could not be normalized or parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// Token renewal returned a status outside the known set.
    #[error("unexpected token renewal status {0}")]
    UnexpectedRenewStatus(i64),
    /// The caller stopped the transport with the error flag set.
    #[error("stopped with error")]
    StoppedWithError,
}

/// Options passed to [`StreamingTransport::start`].
///
/// Built from the candidate's defaults, overridden by caller-supplied values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Physical transport under a hub connection.
    pub transport_type: Option<HubTransportType>,
    /// Connect straight over WebSockets without the negotiate round trip.
    pub skip_negotiation: bool,
    /// Hub wire sub-protocol.
    pub protocol: Option<HubProtocol>,
}

impl TransportOptions {
    /// Default construction options of a candidate.
    #[must_use]
    pub const fn defaults_for(kind: TransportKind) -> Self {
        match kind {
            TransportKind::HubWebSocket => Self {
                transport_type: Some(HubTransportType::WebSockets),
                skip_negotiation: true,
                protocol: None,
            },
            TransportKind::HubLongPolling => Self {
                transport_type: Some(HubTransportType::LongPolling),
                skip_negotiation: false,
                protocol: None,
            },
            _ => Self {
                transport_type: None,
                skip_negotiation: false,
                protocol: None,
            },
        }
    }
}

/// Single-slot caller callbacks. Last write wins.
#[derive(Clone, Default)]
pub struct TransportCallbacks {
    /// Envelope delivery.
    pub received: Option<ReceivedCallback>,
    /// State transitions.
    pub state_changed: Option<StateChangedCallback>,
    /// Authentication rejections.
    pub unauthorized: Option<UnauthorizedCallback>,
    /// Slow-connection warnings.
    pub connection_slow: Option<ConnectionSlowCallback>,
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("received", &self.received.is_some())
            .field("state_changed", &self.state_changed.is_some())
            .field("unauthorized", &self.unauthorized.is_some())
            .field("connection_slow", &self.connection_slow.is_some())
            .finish()
    }
}

/// Uniform operation set of a streaming transport.
///
/// Implementations that do async work spawn it on the ambient Tokio runtime,
/// so `start`, `stop` and `update_query` must be called from within one.
pub trait StreamingTransport: Send + Sync {
    /// Short name of the implementation.
    fn name(&self) -> &'static str;

    /// Connect and begin streaming.
    fn start(&self, options: TransportOptions, on_started: Option<StartedCallback>);

    /// Disconnect. With `has_error` set the transport reports failure once
    /// the connection is down.
    fn stop(&self, has_error: bool);

    /// Record new credentials and session scope; renew the token on the live
    /// connection when `force_auth` is set.
    fn update_query(&self, auth_token: &str, context_id: &str, auth_expiry: i64, force_auth: bool);

    /// Query string of the current connection, if any.
    fn get_query(&self) -> Option<String>;

    /// Install the envelope handler.
    fn set_received_callback(&self, callback: ReceivedCallback);

    /// Install the state transition handler.
    fn set_state_changed_callback(&self, callback: StateChangedCallback);

    /// Install the authentication rejection handler.
    fn set_unauthorized_callback(&self, callback: UnauthorizedCallback);

    /// Install the slow-connection handler.
    fn set_connection_slow_callback(&self, callback: ConnectionSlowCallback);

    /// A caller subscription is no longer acknowledged by the server.
    fn on_orphan_found(&self) {}

    /// A caller subscription request failed on the network.
    fn on_subscribe_network_error(&self) {}

    /// Name of the physical transport underneath, when it differs from
    /// [`StreamingTransport::name`].
    fn underlying_transport(&self) -> Option<String> {
        None
    }
}

/// Probes platform support and instantiates one transport candidate.
#[cfg_attr(test, mockall::automock)]
pub trait TransportBuilder: Send + Sync {
    /// Check if this transport can run here.
    fn is_supported(&self) -> bool;

    /// Create a transport for `base_url` that reports failure to `on_failure`.
    fn build(&self, base_url: &str, on_failure: TransportFailureCallback)
    -> Arc<dyn StreamingTransport>;
}

/// Platform features a hub transport depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PlatformCapabilities {
    /// WebSocket client available.
    pub websocket: bool,
    /// UTF-8 decoding available.
    pub utf8_decoder: bool,
    /// Base64 decoding available.
    pub base64: bool,
    /// Request cancellation available.
    pub abort_controller: bool,
}

impl PlatformCapabilities {
    /// Everything this build links against.
    #[must_use]
    pub const fn native() -> Self {
        Self {
            websocket: true,
            utf8_decoder: true,
            base64: true,
            abort_controller: true,
        }
    }

    /// Check if every feature the hub transport needs is present.
    #[must_use]
    pub const fn supports_hub(&self) -> bool {
        self.websocket && self.utf8_decoder && self.base64 && self.abort_controller
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_defaults() {
        let ws = TransportOptions::defaults_for(TransportKind::HubWebSocket);
        assert_eq!(ws.transport_type, Some(HubTransportType::WebSockets));
        assert!(ws.skip_negotiation);

        let lp = TransportOptions::defaults_for(TransportKind::HubLongPolling);
        assert_eq!(lp.transport_type, Some(HubTransportType::LongPolling));
        assert!(!lp.skip_negotiation);

        let plain = TransportOptions::defaults_for(TransportKind::PlainWebSocket);
        assert_eq!(plain, TransportOptions::default());
    }

    #[test]
    fn hub_needs_every_capability() {
        assert!(PlatformCapabilities::native().supports_hub());

        let without_base64 = PlatformCapabilities {
            base64: false,
            ..PlatformCapabilities::native()
        };
        assert!(!without_base64.supports_hub());
    }
}
