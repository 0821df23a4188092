//! Connection Fallback Tests
//!
//! Runs the [`Connection`] facade over real hub and legacy adapters backed
//! by in-memory connectors.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{FakeHub, Recorder, eventually, far_expiry, json_frame, settle};
use parking_lot::Mutex;
use stream_client::application::ports::{
    ConnectionSlowCallback, LegacyErrorCallback, LegacyLogCallback, NativeStateCallback,
    ReceivedCallback, StartedCallback, native_state,
};
use stream_client::{
    Connection, ConnectionOptions, ConnectionState, HubTransportBuilder, HubTransportType,
    LegacyConnection, LegacyConnector, LegacyTransportBuilder, PlatformCapabilities,
    StreamingMessage, TransportKind, TransportOptions, TransportRegistry,
};

// =============================================================================
// Legacy library stand-in
// =============================================================================

#[derive(Default)]
struct FakeLegacy {
    urls: Mutex<Vec<String>>,
    query: Mutex<Option<String>>,
    on_state: Mutex<Option<NativeStateCallback>>,
    starts: AtomicUsize,
}

struct FakeLegacyConnection(Arc<FakeLegacy>);

impl LegacyConnection for FakeLegacyConnection {
    fn start(&self, _options: &TransportOptions, on_started: Option<StartedCallback>) {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        let on_state = self.0.on_state.lock().clone();
        if let Some(on_state) = on_state {
            on_state(native_state::DISCONNECTED, native_state::CONNECTING);
            on_state(native_state::CONNECTING, native_state::CONNECTED);
        }
        if let Some(on_started) = on_started {
            on_started();
        }
    }

    fn stop(&self) {}

    fn set_query_string(&self, query: String) {
        *self.0.query.lock() = Some(query);
    }

    fn query_string(&self) -> Option<String> {
        self.0.query.lock().clone()
    }

    fn transport_name(&self) -> Option<String> {
        Some("webSockets".to_string())
    }

    fn on_state_changed(&self, handler: NativeStateCallback) {
        *self.0.on_state.lock() = Some(handler);
    }

    fn on_received(&self, _handler: ReceivedCallback) {}

    fn on_connection_slow(&self, _handler: ConnectionSlowCallback) {}

    fn on_error(&self, _handler: LegacyErrorCallback) {}

    fn on_log(&self, _handler: LegacyLogCallback) {}
}

struct FakeLegacyConnector(Arc<FakeLegacy>);

impl LegacyConnector for FakeLegacyConnector {
    fn connect(&self, url: &str) -> Arc<dyn LegacyConnection> {
        self.0.urls.lock().push(url.to_string());
        Arc::new(FakeLegacyConnection(Arc::clone(&self.0)))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn hub_builder(hub: &Arc<FakeHub>, transport_type: HubTransportType) -> Arc<HubTransportBuilder> {
    Arc::new(HubTransportBuilder::new(
        hub.clone(),
        PlatformCapabilities::native(),
        transport_type,
    ))
}

struct Harness {
    connection: Connection,
    recorder: Arc<Recorder>,
    total_failures: Arc<AtomicUsize>,
}

fn connect(registry: &TransportRegistry, transports: Vec<TransportKind>) -> Harness {
    let total_failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&total_failures);
    let connection = Connection::new(
        ConnectionOptions {
            transports: Some(transports),
            ..ConnectionOptions::default()
        },
        "https://host/openapi",
        registry,
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let recorder = Recorder::new();
    let messages = Arc::clone(&recorder);
    connection.set_received_callback(Arc::new(move |message: StreamingMessage| {
        messages.messages.lock().push(message);
    }));
    let states = Arc::clone(&recorder);
    connection.set_state_changed_callback(Arc::new(move |state: ConnectionState| {
        states.states.lock().push(state);
    }));

    Harness {
        connection,
        recorder,
        total_failures,
    }
}

impl Harness {
    fn start(&self) {
        self.connection
            .update_query("BEARER token-1", "ctx-1", far_expiry(), false);
        let started = Arc::clone(&self.recorder);
        self.connection.start(Some(Arc::new(move || {
            started.started.fetch_add(1, Ordering::SeqCst);
        })));
    }

    fn total_failures(&self) -> usize {
        self.total_failures.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn rejected_websocket_falls_back_to_long_polling() {
    let websockets = FakeHub::rejecting();
    let polling = FakeHub::new();
    let registry = TransportRegistry::new()
        .with(
            TransportKind::HubWebSocket,
            hub_builder(&websockets, HubTransportType::WebSockets),
        )
        .with(
            TransportKind::HubLongPolling,
            hub_builder(&polling, HubTransportType::LongPolling),
        );
    let harness = connect(
        &registry,
        vec![TransportKind::HubWebSocket, TransportKind::HubLongPolling],
    );
    assert_eq!(
        harness.connection.transport_name(),
        Some(TransportKind::HubWebSocket)
    );

    harness.start();

    eventually("connected over long polling", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(
        harness.connection.transport_name(),
        Some(TransportKind::HubLongPolling)
    );
    assert_eq!(harness.total_failures(), 0);
    assert_eq!(harness.recorder.started(), 1);

    let request = &polling.requests()[0];
    assert_eq!(request.transport_type, HubTransportType::LongPolling);
    assert!(!request.skip_negotiation);
    assert_eq!(request.url, "https://host/openapi/streaming?contextId=ctx-1");
    assert_eq!(request.access_token.as_ref().unwrap().as_str(), "token-1");

    polling.session(0).push(json_frame("5", r#"{"bid":1.5}"#));
    eventually("message", || harness.recorder.message_ids() == vec!["5"]).await;
    assert_eq!(
        harness.connection.get_query().as_deref(),
        Some("contextId=ctx-1")
    );
}

#[tokio::test]
async fn hub_failure_falls_back_to_legacy() {
    let hub = FakeHub::rejecting();
    let legacy = Arc::new(FakeLegacy::default());
    let registry = TransportRegistry::new()
        .with(
            TransportKind::HubWebSocket,
            hub_builder(&hub, HubTransportType::WebSockets),
        )
        .with(
            TransportKind::LegacyWebSocket,
            Arc::new(LegacyTransportBuilder::new(Arc::new(FakeLegacyConnector(
                Arc::clone(&legacy),
            )))),
        );
    let harness = connect(
        &registry,
        vec![TransportKind::HubWebSocket, TransportKind::LegacyWebSocket],
    );

    harness.start();

    eventually("legacy started", || legacy.starts.load(Ordering::SeqCst) == 1).await;
    assert_eq!(
        legacy.urls.lock().as_slice(),
        ["https://host/openapi/streaming/connection"]
    );
    assert_eq!(
        harness.connection.get_query().as_deref(),
        Some("authorization=BEARER%20token-1&context=ctx-1")
    );
    assert_eq!(
        harness.connection.get_transport().as_deref(),
        Some("webSockets")
    );
    assert_eq!(harness.connection.state(), ConnectionState::Connected);
    assert_eq!(harness.recorder.started(), 1);
    assert_eq!(harness.total_failures(), 0);
}

#[tokio::test]
async fn every_transport_rejecting_is_a_total_failure() {
    let websockets = FakeHub::rejecting();
    let polling = FakeHub::rejecting();
    let registry = TransportRegistry::new()
        .with(
            TransportKind::HubWebSocket,
            hub_builder(&websockets, HubTransportType::WebSockets),
        )
        .with(
            TransportKind::HubLongPolling,
            hub_builder(&polling, HubTransportType::LongPolling),
        );
    let harness = connect(
        &registry,
        vec![TransportKind::HubWebSocket, TransportKind::HubLongPolling],
    );

    harness.start();

    eventually("total failure", || harness.total_failures() == 1).await;
    settle().await;
    assert_eq!(harness.total_failures(), 1);
    assert_eq!(harness.connection.transport_name(), None);
    assert_eq!(harness.connection.get_transport(), None);
    assert_eq!(websockets.requests().len(), 1);
    assert_eq!(polling.requests().len(), 1);
    assert_eq!(harness.recorder.started(), 0);
}

#[tokio::test]
async fn unavailable_transport_type_is_skipped() {
    let hub = FakeHub::new();
    hub.without(HubTransportType::WebSockets);
    let registry = TransportRegistry::new()
        .with(
            TransportKind::HubWebSocket,
            hub_builder(&hub, HubTransportType::WebSockets),
        )
        .with(
            TransportKind::HubLongPolling,
            hub_builder(&hub, HubTransportType::LongPolling),
        );
    let harness = connect(
        &registry,
        vec![TransportKind::HubWebSocket, TransportKind::HubLongPolling],
    );

    assert_eq!(
        harness.connection.transport_name(),
        Some(TransportKind::HubLongPolling)
    );

    harness.start();
    eventually("connected", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(hub.requests().len(), 1);
    assert_eq!(hub.requests()[0].transport_type, HubTransportType::LongPolling);
}

#[tokio::test]
async fn unregistered_transports_only_is_an_immediate_total_failure() {
    let harness = connect(&TransportRegistry::new(), TransportKind::DEFAULTS.to_vec());

    assert_eq!(harness.total_failures(), 1);
    assert_eq!(harness.connection.transport_name(), None);

    harness.start();
    settle().await;
    assert_eq!(harness.total_failures(), 1);
    assert!(harness.recorder.states().is_empty());
}

#[tokio::test]
async fn disposed_connection_goes_silent() {
    let hub = FakeHub::new();
    let registry = TransportRegistry::new().with(
        TransportKind::HubWebSocket,
        hub_builder(&hub, HubTransportType::WebSockets),
    );
    let harness = connect(&registry, vec![TransportKind::HubWebSocket]);
    harness.start();
    eventually("connected", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;

    hub.session(0).push(json_frame("1", "{}"));
    eventually("message", || harness.recorder.message_ids().len() == 1).await;
    let states_before = harness.recorder.states();

    harness.connection.dispose();
    hub.session(0).push(json_frame("2", "{}"));
    harness.connection.stop();
    eventually("transport disconnected", || {
        harness.connection.state() == ConnectionState::Disconnected
    })
    .await;
    settle().await;

    assert_eq!(harness.recorder.message_ids(), vec!["1"]);
    assert_eq!(harness.recorder.states(), states_before);
}

#[tokio::test]
async fn dispose_during_reconnect_silences_the_restored_connection() {
    let hub = FakeHub::new();
    let registry = TransportRegistry::new().with(
        TransportKind::HubWebSocket,
        hub_builder(&hub, HubTransportType::WebSockets),
    );
    let harness = connect(&registry, vec![TransportKind::HubWebSocket]);
    harness.start();
    eventually("connected", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;
    hub.session(0).push(json_frame("1", "{}"));
    eventually("message", || harness.recorder.message_ids().len() == 1).await;

    let gate = hub.hold();
    hub.session(0)
        .drop_connection(stream_client::application::ports::HubError::WebSocket(
            "reset".to_string(),
        ));
    eventually("reconnecting", || {
        harness.connection.state() == ConnectionState::Reconnecting
    })
    .await;
    eventually("reconnect attempt", || hub.requests().len() == 2).await;
    let states_before = harness.recorder.states();

    harness.connection.dispose();
    gate.notify_one();
    eventually("transport restored", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;
    hub.session(1).push(json_frame("2", "{}"));
    settle().await;

    assert_eq!(states_before.last(), Some(&ConnectionState::Reconnecting));
    assert_eq!(harness.recorder.states(), states_before);
    assert_eq!(harness.recorder.message_ids(), vec!["1"]);
    assert_eq!(harness.total_failures(), 0);
}

#[tokio::test]
async fn stop_and_restart_keeps_the_same_transport() {
    let hub = FakeHub::new();
    let registry = TransportRegistry::new().with(
        TransportKind::HubWebSocket,
        hub_builder(&hub, HubTransportType::WebSockets),
    );
    let harness = connect(&registry, vec![TransportKind::HubWebSocket]);
    harness.start();
    eventually("connected", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;

    harness.connection.stop();
    eventually("disconnected", || {
        harness.connection.state() == ConnectionState::Disconnected
    })
    .await;
    harness.start();
    eventually("reconnected", || hub.session_count() == 2).await;
    eventually("connected again", || {
        harness.connection.state() == ConnectionState::Connected
    })
    .await;

    assert_eq!(
        harness.connection.transport_name(),
        Some(TransportKind::HubWebSocket)
    );
    assert_eq!(harness.total_failures(), 0);
    assert_eq!(
        harness.recorder.states(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}
