//! Legacy Connection Port (Driven Port)
//!
//! Narrow view of the third-party legacy connection library the fallback
//! transport adapts.

use std::sync::Arc;

use crate::application::ports::{
    ConnectionSlowCallback, ReceivedCallback, StartedCallback, TransportOptions,
};

/// Native state codes reported by the legacy library.
pub mod native_state {
    /// Connecting.
    pub const CONNECTING: u8 = 0;
    /// Connected.
    pub const CONNECTED: u8 = 1;
    /// Reconnecting.
    pub const RECONNECTING: u8 = 2;
    /// Disconnected.
    pub const DISCONNECTED: u8 = 4;
}

/// Error surfaced through the legacy error channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LegacyError {
    /// HTTP status of the failing request, when there was one.
    pub status: Option<u16>,
    /// Description.
    pub message: String,
}

/// Handler for native state changes: `(old, new)`.
pub type NativeStateCallback = Arc<dyn Fn(u8, u8) + Send + Sync>;
/// Handler for errors from the library.
pub type LegacyErrorCallback = Arc<dyn Fn(LegacyError) + Send + Sync>;
/// Handler for library log lines.
pub type LegacyLogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A legacy library connection.
pub trait LegacyConnection: Send + Sync {
    /// Start connecting.
    fn start(&self, options: &TransportOptions, on_started: Option<StartedCallback>);

    /// Disconnect.
    fn stop(&self);

    /// Replace the connection query string.
    fn set_query_string(&self, query: String);

    /// Current query string.
    fn query_string(&self) -> Option<String>;

    /// Name of the physical transport the library picked.
    fn transport_name(&self) -> Option<String>;

    /// Install the native state handler.
    fn on_state_changed(&self, handler: NativeStateCallback);

    /// Install the envelope handler.
    fn on_received(&self, handler: ReceivedCallback);

    /// Install the slow-connection handler.
    fn on_connection_slow(&self, handler: ConnectionSlowCallback);

    /// Install the error handler.
    fn on_error(&self, handler: LegacyErrorCallback);

    /// Install the log handler.
    fn on_log(&self, handler: LegacyLogCallback);
}

/// Creates legacy connections.
pub trait LegacyConnector: Send + Sync {
    /// Create a connection to `url`.
    fn connect(&self, url: &str) -> Arc<dyn LegacyConnection>;
}
