//! Legacy Fallback Transport
//!
//! Adapts an injected [`LegacyConnection`] to the transport contract. The
//! library does its own transport negotiation and reconnects, so this layer
//! only translates states, errors and log lines.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;

use crate::application::ports::{
    ConnectionSlowCallback, LegacyConnection, LegacyConnector, LegacyError, ReceivedCallback,
    StartedCallback, StateChangedCallback, StreamingTransport, TransportBuilder,
    TransportFailureCallback, TransportOptions, UnauthorizedCallback, native_state,
};
use crate::domain::connection::ConnectionState;

#[allow(clippy::expect_used)]
static BEARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BEARER[^&]+").expect("static bearer pattern is valid"));

/// Scrub bearer tokens from a library log line.
#[must_use]
pub fn redact_token(message: &str) -> String {
    BEARER_TOKEN
        .replace_all(message, "[REDACTED]")
        .into_owned()
}

/// Map a native state code to the canonical set.
#[must_use]
pub const fn map_native_state(code: u8) -> Option<ConnectionState> {
    match code {
        native_state::CONNECTING => Some(ConnectionState::Connecting),
        native_state::CONNECTED => Some(ConnectionState::Connected),
        native_state::RECONNECTING => Some(ConnectionState::Reconnecting),
        native_state::DISCONNECTED => Some(ConnectionState::Disconnected),
        _ => None,
    }
}

#[derive(Default)]
struct LegacySlots {
    state_changed: Option<StateChangedCallback>,
    unauthorized: Option<UnauthorizedCallback>,
}

/// Transport backed by the legacy connection library.
pub struct LegacyTransport {
    connection: Arc<dyn LegacyConnection>,
    slots: Arc<RwLock<LegacySlots>>,
}

impl LegacyTransport {
    /// Connect to `{base_url}/streaming/connection`.
    #[must_use]
    pub fn new(base_url: &str, connector: &dyn LegacyConnector) -> Self {
        let url = format!("{}/streaming/connection", base_url.trim_end_matches('/'));
        let connection = connector.connect(&url);
        let slots = Arc::new(RwLock::new(LegacySlots::default()));

        let state_slots = Arc::clone(&slots);
        connection.on_state_changed(Arc::new(move |_old: u8, new: u8| {
            let Some(state) = map_native_state(new) else {
                tracing::warn!(native_state = new, "Unrecognised legacy connection state");
                return;
            };
            let callback = state_slots.read().state_changed.clone();
            if let Some(callback) = callback {
                callback(state);
            }
        }));

        let error_slots = Arc::clone(&slots);
        connection.on_error(Arc::new(move |error: LegacyError| {
            tracing::warn!(error = %error, status = ?error.status, "Legacy transport error");
            if error.status == Some(401) {
                let callback = error_slots.read().unauthorized.clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
        }));

        connection.on_log(Arc::new(|message: &str| {
            tracing::debug!(message = %redact_token(message), "Legacy connection log");
        }));

        Self { connection, slots }
    }
}

impl StreamingTransport for LegacyTransport {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn start(&self, options: TransportOptions, on_started: Option<StartedCallback>) {
        self.connection.start(&options, on_started);
    }

    fn stop(&self, _has_error: bool) {
        self.connection.stop();
    }

    fn update_query(&self, auth_token: &str, context_id: &str, _auth_expiry: i64, _force_auth: bool) {
        self.connection.set_query_string(format!(
            "authorization={}&context={}",
            urlencoding::encode(auth_token),
            urlencoding::encode(context_id)
        ));
    }

    fn get_query(&self) -> Option<String> {
        self.connection.query_string()
    }

    fn set_received_callback(&self, callback: ReceivedCallback) {
        self.connection.on_received(callback);
    }

    fn set_state_changed_callback(&self, callback: StateChangedCallback) {
        self.slots.write().state_changed = Some(callback);
    }

    fn set_unauthorized_callback(&self, callback: UnauthorizedCallback) {
        self.slots.write().unauthorized = Some(callback);
    }

    fn set_connection_slow_callback(&self, callback: ConnectionSlowCallback) {
        self.connection.on_connection_slow(callback);
    }

    fn underlying_transport(&self) -> Option<String> {
        self.connection.transport_name()
    }
}

/// Builds [`LegacyTransport`]s. Always supported.
pub struct LegacyTransportBuilder {
    connector: Arc<dyn LegacyConnector>,
}

impl LegacyTransportBuilder {
    /// Create a builder around a legacy library connector.
    #[must_use]
    pub const fn new(connector: Arc<dyn LegacyConnector>) -> Self {
        Self { connector }
    }
}

impl TransportBuilder for LegacyTransportBuilder {
    fn is_supported(&self) -> bool {
        true
    }

    fn build(
        &self,
        base_url: &str,
        _on_failure: TransportFailureCallback,
    ) -> Arc<dyn StreamingTransport> {
        Arc::new(LegacyTransport::new(base_url, self.connector.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use test_case::test_case;

    use super::*;
    use crate::application::ports::{LegacyErrorCallback, LegacyLogCallback, NativeStateCallback};

    #[derive(Default)]
    struct FakeConnection {
        url: String,
        query: Mutex<Option<String>>,
        started: AtomicUsize,
        stopped: AtomicUsize,
        state_handler: Mutex<Option<NativeStateCallback>>,
        error_handler: Mutex<Option<LegacyErrorCallback>>,
        log_handler: Mutex<Option<LegacyLogCallback>>,
    }

    impl FakeConnection {
        fn emit_state(&self, old: u8, new: u8) {
            let handler = self.state_handler.lock().clone().unwrap();
            handler(old, new);
        }

        fn emit_error(&self, status: Option<u16>) {
            let handler = self.error_handler.lock().clone().unwrap();
            handler(LegacyError {
                status,
                message: "request failed".to_string(),
            });
        }
    }

    impl LegacyConnection for FakeConnection {
        fn start(&self, _options: &TransportOptions, on_started: Option<StartedCallback>) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(cb) = on_started {
                cb();
            }
        }
        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        fn set_query_string(&self, query: String) {
            *self.query.lock() = Some(query);
        }
        fn query_string(&self) -> Option<String> {
            self.query.lock().clone()
        }
        fn transport_name(&self) -> Option<String> {
            Some("serverSentEvents".to_string())
        }
        fn on_state_changed(&self, handler: NativeStateCallback) {
            *self.state_handler.lock() = Some(handler);
        }
        fn on_received(&self, _handler: ReceivedCallback) {}
        fn on_connection_slow(&self, _handler: ConnectionSlowCallback) {}
        fn on_error(&self, handler: LegacyErrorCallback) {
            *self.error_handler.lock() = Some(handler);
        }
        fn on_log(&self, handler: LegacyLogCallback) {
            *self.log_handler.lock() = Some(handler);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        last: Mutex<Option<Arc<FakeConnection>>>,
    }

    impl LegacyConnector for FakeConnector {
        fn connect(&self, url: &str) -> Arc<dyn LegacyConnection> {
            let connection = Arc::new(FakeConnection {
                url: url.to_string(),
                ..FakeConnection::default()
            });
            *self.last.lock() = Some(Arc::clone(&connection));
            connection
        }
    }

    fn build() -> (LegacyTransport, Arc<FakeConnection>) {
        let connector = FakeConnector::default();
        let transport = LegacyTransport::new("https://host/openapi/", &connector);
        let connection = connector.last.lock().clone().unwrap();
        (transport, connection)
    }

    #[test_case(0, Some(ConnectionState::Connecting))]
    #[test_case(1, Some(ConnectionState::Connected))]
    #[test_case(2, Some(ConnectionState::Reconnecting))]
    #[test_case(4, Some(ConnectionState::Disconnected))]
    #[test_case(3, None)]
    fn native_state_mapping(code: u8, expected: Option<ConnectionState>) {
        assert_eq!(map_native_state(code), expected);
    }

    #[test]
    fn connects_to_connection_endpoint() {
        let (_transport, connection) = build();
        assert_eq!(connection.url, "https://host/openapi/streaming/connection");
    }

    #[test]
    fn query_is_url_encoded() {
        let (transport, _connection) = build();
        transport.update_query("BEARER a/b", "ctx 1", 0, false);
        assert_eq!(
            transport.get_query().as_deref(),
            Some("authorization=BEARER%20a%2Fb&context=ctx%201")
        );
    }

    #[test]
    fn state_changes_are_mapped() {
        let (transport, connection) = build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.set_state_changed_callback(Arc::new(move |state: ConnectionState| sink.lock().push(state)));

        connection.emit_state(native_state::CONNECTING, native_state::CONNECTED);
        connection.emit_state(native_state::CONNECTED, 3);
        connection.emit_state(native_state::CONNECTED, native_state::DISCONNECTED);

        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connected, ConnectionState::Disconnected]
        );
    }

    #[test]
    fn only_401_is_unauthorized() {
        let (transport, connection) = build();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        transport.set_unauthorized_callback(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        connection.emit_error(Some(500));
        connection.emit_error(None);
        connection.emit_error(Some(401));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_and_stop_delegate() {
        let (transport, connection) = build();
        let started = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&started);

        transport.start(
            TransportOptions::default(),
            Some(Arc::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            })),
        );
        transport.stop(true);

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(connection.started.load(Ordering::SeqCst), 1);
        assert_eq!(connection.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.underlying_transport().as_deref(),
            Some("serverSentEvents")
        );
    }

    #[test]
    fn redaction_covers_every_token() {
        let line = "GET /connect?authorization=BEARER%20abc.def&context=1 then BEARER xyz";
        let redacted = redact_token(line);
        assert_eq!(
            redacted,
            "GET /connect?authorization=[REDACTED]&context=1 then [REDACTED]"
        );
    }

    #[test]
    fn redaction_is_case_insensitive() {
        assert_eq!(redact_token("bearer secret"), "[REDACTED]");
        assert_eq!(redact_token("no token here"), "no token here");
    }
}
