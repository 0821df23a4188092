//! In-memory hub connector for integration tests.
//!
//! Each connect attempt follows the next queued plan (success by default)
//! and produces a [`FakeSession`] the test can push frames into, drop, or
//! inspect for the invocations the transport made.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use parking_lot::Mutex;
use stream_client::application::ports::{
    FramePayload, HubConnectRequest, HubConnection, HubConnector, HubError, HubSession,
    MessageStream, RawFrame, RenewTokenResponse, TransportError,
};
use stream_client::{AccessToken, ConnectionState, HubTransportType, StreamingMessage};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

// =============================================================================
// Session
// =============================================================================

/// One fake hub session.
#[derive(Default)]
pub struct FakeSession {
    frames: Mutex<Option<mpsc::UnboundedSender<Result<RawFrame, HubError>>>>,
    closed: Mutex<Option<oneshot::Sender<Option<HubError>>>>,
    calls: Mutex<Vec<String>>,
    renew_answers: Mutex<VecDeque<Result<i64, HubError>>>,
    renew_gate: Mutex<Option<Arc<Notify>>>,
    fail_stream_start: bool,
}

impl FakeSession {
    /// Invocations made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Push a stream item.
    pub fn push(&self, frame: RawFrame) {
        if let Some(frames) = self.frames.lock().as_ref() {
            let _ = frames.send(Ok(frame));
        }
    }

    /// Push an item the connector could not turn into a frame.
    pub fn push_invalid(&self, reason: &str) {
        if let Some(frames) = self.frames.lock().as_ref() {
            let _ = frames.send(Err(HubError::InvalidItem(reason.to_string())));
        }
    }

    /// Fail the open stream.
    pub fn fail_stream(&self, error: HubError) {
        if let Some(frames) = self.frames.lock().take() {
            let _ = frames.send(Err(error));
        }
    }

    /// Complete the open stream.
    pub fn complete_stream(&self) {
        self.frames.lock().take();
    }

    /// Drop the connection abruptly, failing the open stream first.
    pub fn drop_connection(&self, error: HubError) {
        self.fail_stream(error.clone());
        if let Some(closed) = self.closed.lock().take() {
            let _ = closed.send(Some(error));
        }
    }

    /// Hold the next `RenewToken` answer until the returned notify fires.
    pub fn hold_renewal(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.renew_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `RenewToken` invocations so far.
    pub fn renew_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with("RenewToken"))
            .count()
    }

    /// Queue the answer to the next `RenewToken`.
    pub fn answer_renewal(&self, answer: Result<i64, HubError>) {
        self.renew_answers.lock().push_back(answer);
    }
}

#[async_trait]
impl HubSession for FakeSession {
    async fn start_streaming(&self) -> Result<MessageStream, HubError> {
        self.record("StartStreaming");
        if self.fail_stream_start {
            return Err(HubError::Invocation("stream refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.frames.lock() = Some(tx);
        Ok(MessageStream {
            id: "1".to_string(),
            frames: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn cancel_stream(&self, stream_id: &str) -> Result<(), HubError> {
        self.record(format!("CancelStream({stream_id})"));
        self.frames.lock().take();
        Ok(())
    }

    async fn renew_token(&self, token: &AccessToken) -> Result<RenewTokenResponse, HubError> {
        self.record(format!("RenewToken({})", token.as_str()));
        let gate = self.renew_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let answer = self.renew_answers.lock().pop_front().unwrap_or(Ok(0));
        answer.map(|status| RenewTokenResponse { status })
    }

    async fn close_connection(&self) -> Result<(), HubError> {
        self.record("CloseConnection");
        Ok(())
    }

    async fn stop(&self) {
        self.record("Stop");
        self.frames.lock().take();
        if let Some(closed) = self.closed.lock().take() {
            let _ = closed.send(None);
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// What the next connect attempt does.
pub enum ConnectPlan {
    /// Succeed.
    Accept,
    /// Succeed, but refuse to open the message stream.
    AcceptWithoutStream,
    /// Fail with the error.
    Reject(HubError),
}

/// Fake [`HubConnector`].
#[derive(Default)]
pub struct FakeHub {
    plans: Mutex<VecDeque<ConnectPlan>>,
    requests: Mutex<Vec<HubConnectRequest>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    unsupported: Mutex<Vec<HubTransportType>>,
}

impl FakeHub {
    /// Create a hub that accepts every connect.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a hub that rejects every connect.
    pub fn rejecting() -> Arc<Self> {
        let hub = Self::new();
        for _ in 0..16 {
            hub.plan(ConnectPlan::Reject(HubError::Connect("refused".to_string())));
        }
        hub
    }

    /// Queue the behavior of the next connect attempt.
    pub fn plan(&self, plan: ConnectPlan) {
        self.plans.lock().push_back(plan);
    }

    /// Hold connects until the returned notify fires.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Report `transport_type` as unavailable.
    pub fn without(&self, transport_type: HubTransportType) {
        self.unsupported.lock().push(transport_type);
    }

    /// Every connect request so far.
    pub fn requests(&self) -> Vec<HubConnectRequest> {
        self.requests.lock().clone()
    }

    /// Session of the `index`-th successful connect.
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    /// Number of successful connects.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl HubConnector for FakeHub {
    fn supports(&self, transport_type: HubTransportType) -> bool {
        !self.unsupported.lock().contains(&transport_type)
    }

    async fn connect(&self, request: HubConnectRequest) -> Result<HubConnection, HubError> {
        self.requests.lock().push(request);

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let plan = self.plans.lock().pop_front().unwrap_or(ConnectPlan::Accept);
        let fail_stream_start = match plan {
            ConnectPlan::Accept => false,
            ConnectPlan::AcceptWithoutStream => true,
            ConnectPlan::Reject(error) => return Err(error),
        };

        let (closed_tx, closed_rx) = oneshot::channel();
        let session = Arc::new(FakeSession {
            closed: Mutex::new(Some(closed_tx)),
            fail_stream_start,
            ..FakeSession::default()
        });
        self.sessions.lock().push(Arc::clone(&session));

        Ok(HubConnection {
            session,
            closed: closed_rx,
        })
    }
}

// =============================================================================
// Recorders
// =============================================================================

/// Collects everything a transport reports.
#[derive(Default)]
pub struct Recorder {
    pub messages: Mutex<Vec<StreamingMessage>>,
    pub states: Mutex<Vec<ConnectionState>>,
    pub failures: Mutex<Vec<TransportError>>,
    pub unauthorized: AtomicUsize,
    pub started: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    pub fn last_state(&self) -> Option<ConnectionState> {
        self.states.lock().last().copied()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.message_id.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<TransportError> {
        self.failures.lock().clone()
    }

    pub fn unauthorized(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// JSON frame whose payload is base64 text, as on the JSON sub-protocol.
pub fn json_frame(message_id: &str, json: &str) -> RawFrame {
    RawFrame {
        reference_id: "prices".to_string(),
        payload_format: 1,
        payload: FramePayload::Text(BASE64.encode(json)),
        message_id: message_id.to_string(),
    }
}

/// Epoch milliseconds one hour from now.
pub fn far_expiry() -> i64 {
    chrono::Utc::now().timestamp_millis() + 3_600_000
}

/// Wait until `condition` holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
