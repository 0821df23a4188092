//! Reconnecting Hub Transport
//!
//! Streams server frames over a hub connection and keeps the session alive
//! across network drops.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──start──► Connecting ──► Connected ──drop──► Reconnecting
//!       ▲                      │             ▲                    │
//!       │                  failure           └────── success ─────┤
//!       │                      ▼                                  │
//!       │              transport failure                         stop
//!       └─────────────── closure ◄─────────────────────────────────┘
//! ```
//!
//! - A failed initial connect reports transport failure (the facade falls
//!   back to the next candidate) instead of retrying.
//! - An abrupt drop consults the [`RetryPolicy`]; a graceful close goes
//!   straight to closure.
//! - A frame that does not parse stops the transport with the error flag,
//!   so closure reports transport failure.
//!
//! Every connection gets a generation number. Tasks belonging to a replaced
//! connection find their generation gone and leave the state alone.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use regex::Regex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::auth::{RenewAction, RenewStatus};
use super::payload;
use super::reconnect::RetryPolicy;
use crate::application::ports::{
    ConnectionSlowCallback, FrameStream, HubConnectRequest, HubConnection, HubConnector,
    HubError, HubSession, PlatformCapabilities, RawFrame, ReceivedCallback, StartedCallback,
    StateChangedCallback, StreamingTransport, TransportBuilder, TransportCallbacks,
    TransportError, TransportFailureCallback, TransportOptions, UnauthorizedCallback,
};
use crate::domain::connection::{
    AccessToken, ConnectionState, HubProtocol, HubTransportType, SessionContext,
};
use crate::infrastructure::metrics;

/// Pause between failed `RenewToken` attempts.
const RENEW_RETRY_DELAY: Duration = Duration::from_millis(100);

#[allow(clippy::expect_used)]
static MESSAGE_ID_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&messageId=[^&]*").expect("static messageId pattern is valid")
});

/// Point `url` at `message_id`, replacing any earlier resume position.
#[must_use]
pub fn with_message_id(url: &str, message_id: Option<&str>) -> String {
    let base = MESSAGE_ID_PARAM.replace_all(url, "");
    match message_id {
        Some(id) => format!("{base}&messageId={id}"),
        None => base.into_owned(),
    }
}

// =============================================================================
// State
// =============================================================================

struct ActiveConnection {
    generation: u64,
    url: String,
    protocol: HubProtocol,
    session: Option<Arc<dyn HubSession>>,
    stream_id: Option<String>,
    last_used_token: Option<AccessToken>,
    cancel: CancellationToken,
}

struct HubState {
    session: SessionContext,
    connection: Option<ActiveConnection>,
    connection_state: ConnectionState,
    has_streaming_started: bool,
    is_disconnecting: bool,
    pending_failure: Option<TransportError>,
    next_generation: u64,
}

impl HubState {
    const fn new() -> Self {
        Self {
            session: SessionContext {
                auth_token: None,
                auth_expiry: None,
                context_id: None,
                last_message_id: None,
            },
            connection: None,
            connection_state: ConnectionState::Disconnected,
            has_streaming_started: false,
            is_disconnecting: false,
            pending_failure: None,
            next_generation: 0,
        }
    }

    fn active(&self, generation: u64) -> Option<&ActiveConnection> {
        self.connection
            .as_ref()
            .filter(|conn| conn.generation == generation)
    }

    fn active_mut(&mut self, generation: u64) -> Option<&mut ActiveConnection> {
        self.connection
            .as_mut()
            .filter(|conn| conn.generation == generation)
    }

    fn is_connected(&self, generation: u64) -> bool {
        self.connection_state.is_connected()
            && self
                .active(generation)
                .is_some_and(|conn| conn.session.is_some())
    }

    /// Connected, and still on `session` rather than a reconnected one.
    fn is_current_session(&self, generation: u64, session: &Arc<dyn HubSession>) -> bool {
        self.connection_state.is_connected()
            && self
                .active(generation)
                .and_then(|conn| conn.session.as_ref())
                .is_some_and(|current| Arc::ptr_eq(current, session))
    }
}

struct HubInner {
    base_url: String,
    connector: Arc<dyn HubConnector>,
    retry_policy: RetryPolicy,
    on_failure: TransportFailureCallback,
    callbacks: RwLock<TransportCallbacks>,
    state: Mutex<HubState>,
    /// Held from a state write until its callback returns, so observers see
    /// transitions in write order. Reentrant for callbacks that call back in.
    emitting: ReentrantMutex<()>,
}

// =============================================================================
// Transport
// =============================================================================

/// Hub-style streaming transport with automatic reconnect and token renewal.
pub struct HubTransport {
    inner: Arc<HubInner>,
}

impl HubTransport {
    /// Create a transport for `base_url`.
    #[must_use]
    pub fn new(
        base_url: &str,
        connector: Arc<dyn HubConnector>,
        on_failure: TransportFailureCallback,
    ) -> Self {
        Self::with_retry_policy(base_url, connector, on_failure, RetryPolicy::default())
    }

    /// Create a transport with a custom retry policy.
    #[must_use]
    pub fn with_retry_policy(
        base_url: &str,
        connector: Arc<dyn HubConnector>,
        on_failure: TransportFailureCallback,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                connector,
                retry_policy,
                on_failure,
                callbacks: RwLock::new(TransportCallbacks::default()),
                state: Mutex::new(HubState::new()),
                emitting: ReentrantMutex::new(()),
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection_state
    }

    /// Snapshot of the session context.
    #[must_use]
    pub fn session(&self) -> SessionContext {
        self.inner.state.lock().session.clone()
    }
}

impl StreamingTransport for HubTransport {
    fn name(&self) -> &'static str {
        "hub"
    }

    fn start(&self, options: TransportOptions, on_started: Option<StartedCallback>) {
        self.inner.start(options, on_started);
    }

    fn stop(&self, has_error: bool) {
        self.inner
            .stop(has_error.then_some(TransportError::StoppedWithError));
    }

    fn update_query(&self, auth_token: &str, context_id: &str, auth_expiry: i64, force_auth: bool) {
        self.inner
            .state
            .lock()
            .session
            .update(AccessToken::new(auth_token), context_id, auth_expiry);

        if force_auth {
            self.inner.renew_session();
        }
    }

    fn get_query(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state
            .connection
            .as_ref()
            .and_then(|conn| conn.url.split_once('?'))
            .map(|(_, query)| query.to_string())
    }

    fn set_received_callback(&self, callback: ReceivedCallback) {
        self.inner.callbacks.write().received = Some(callback);
    }

    fn set_state_changed_callback(&self, callback: StateChangedCallback) {
        self.inner.callbacks.write().state_changed = Some(callback);
    }

    fn set_unauthorized_callback(&self, callback: UnauthorizedCallback) {
        self.inner.callbacks.write().unauthorized = Some(callback);
    }

    fn set_connection_slow_callback(&self, callback: ConnectionSlowCallback) {
        self.inner.callbacks.write().connection_slow = Some(callback);
    }
}

impl HubInner {
    // -------------------------------------------------------------------------
    // Connect
    // -------------------------------------------------------------------------

    fn start(self: &Arc<Self>, options: TransportOptions, on_started: Option<StartedCallback>) {
        let protocol = options.protocol.unwrap_or_default();
        let (generation, cancel) = {
            let mut state = self.state.lock();
            if state.connection.is_some() {
                tracing::warn!("Hub connection already exists, ignoring start");
                return;
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            let url = format!(
                "{}/streaming?contextId={}",
                self.base_url,
                state.session.context_id.as_deref().unwrap_or_default()
            );
            let cancel = CancellationToken::new();
            state.connection = Some(ActiveConnection {
                generation,
                url,
                protocol,
                session: None,
                stream_id: None,
                last_used_token: None,
                cancel: cancel.clone(),
            });
            (generation, cancel)
        };

        tracing::info!(
            protocol = protocol.name(),
            transport_type = ?options.transport_type.unwrap_or(HubTransportType::WebSockets),
            "Starting hub connection"
        );
        self.set_state_if_current(generation, ConnectionState::Connecting);

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run(generation, options, on_started, cancel).await });
    }

    fn connect_request(&self, generation: u64, options: &TransportOptions) -> Option<HubConnectRequest> {
        let mut state = self.state.lock();
        let token = state.session.auth_token.clone();
        let conn = state.active_mut(generation)?;
        conn.last_used_token.clone_from(&token);
        Some(HubConnectRequest {
            url: conn.url.clone(),
            access_token: token,
            protocol: conn.protocol,
            transport_type: options
                .transport_type
                .unwrap_or(HubTransportType::WebSockets),
            skip_negotiation: options.skip_negotiation,
        })
    }

    async fn connect(
        &self,
        request: HubConnectRequest,
        cancel: &CancellationToken,
    ) -> Option<Result<HubConnection, HubError>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.connector.connect(request) => Some(result),
        }
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        options: TransportOptions,
        on_started: Option<StartedCallback>,
        cancel: CancellationToken,
    ) {
        let Some(request) = self.connect_request(generation, &options) else {
            return;
        };

        let mut connection = match self.connect(request, &cancel).await {
            None => {
                tracing::debug!("Hub connect cancelled");
                self.handle_connection_closure(generation, None);
                return;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to start hub connection");
                self.discard_connection(generation);
                (self.on_failure)(TransportError::ConnectFailed(e.to_string()));
                return;
            }
            Some(Ok(connection)) => connection,
        };

        let mut frames = match self
            .on_connected(generation, &connection.session, on_started.as_ref())
            .await
        {
            Ok(frames) => frames,
            Err(()) => {
                connection.session.stop().await;
                self.handle_connection_closure(generation, None);
                return;
            }
        };

        loop {
            let Some(error) = self
                .pump(generation, &mut frames, &mut connection.closed)
                .await
            else {
                self.handle_connection_closure(generation, None);
                return;
            };

            let Some(next) = self.reconnect(generation, error, &options, &cancel).await else {
                return;
            };
            connection = next;
            frames = match self
                .on_connected(generation, &connection.session, None)
                .await
            {
                Ok(frames) => frames,
                Err(()) => {
                    connection.session.stop().await;
                    self.handle_connection_closure(generation, None);
                    return;
                }
            };
        }
    }

    /// Install a fresh session, open the message stream and go Connected.
    ///
    /// Fails when a stop arrived while the connect was in flight.
    async fn on_connected(
        self: &Arc<Self>,
        generation: u64,
        session: &Arc<dyn HubSession>,
        on_started: Option<&StartedCallback>,
    ) -> Result<Option<FrameStream>, ()> {
        {
            let mut state = self.state.lock();
            if state.is_disconnecting {
                tracing::debug!("Stop requested while connecting, skipping stream start");
                return Err(());
            }
            let Some(conn) = state.active_mut(generation) else {
                return Err(());
            };
            conn.session = Some(Arc::clone(session));
        }

        let frames = self.create_message_stream(generation, session).await;

        if let Some(on_started) = on_started {
            on_started();
        }
        self.set_state_if_current(generation, ConnectionState::Connected);

        let token_rotated = {
            let state = self.state.lock();
            state
                .active(generation)
                .is_some_and(|conn| conn.last_used_token != state.session.auth_token)
        };
        if token_rotated {
            tracing::debug!("Token changed while connecting, renewing");
            self.renew_session();
        }

        Ok(frames)
    }

    // -------------------------------------------------------------------------
    // Message stream
    // -------------------------------------------------------------------------

    async fn create_message_stream(
        self: &Arc<Self>,
        generation: u64,
        session: &Arc<dyn HubSession>,
    ) -> Option<FrameStream> {
        match session.start_streaming().await {
            Ok(stream) => {
                if let Some(conn) = self.state.lock().active_mut(generation) {
                    conn.stream_id = Some(stream.id);
                }
                Some(stream.frames)
            }
            Err(e) => {
                self.handle_message_stream_error(generation, &e);
                None
            }
        }
    }

    /// Deliver stream items until the connection closes; returns the close
    /// cause (`None` for a graceful close).
    async fn pump(
        self: &Arc<Self>,
        generation: u64,
        frames: &mut Option<FrameStream>,
        closed: &mut oneshot::Receiver<Option<HubError>>,
    ) -> Option<HubError> {
        loop {
            tokio::select! {
                biased;
                item = next_frame(frames) => match item {
                    Some(Ok(frame)) => self.handle_next_message(generation, frame),
                    Some(Err(HubError::InvalidItem(reason))) => {
                        self.handle_invalid_item(generation, &reason);
                    }
                    Some(Err(e)) => {
                        *frames = None;
                        self.handle_message_stream_error(generation, &e);
                    }
                    None => {
                        *frames = None;
                        self.handle_message_stream_complete(generation);
                    }
                },
                reason = &mut *closed => {
                    return reason.unwrap_or(Some(HubError::ConnectionClosed));
                }
            }
        }
    }

    fn handle_next_message(self: &Arc<Self>, generation: u64, frame: RawFrame) {
        let outcome = {
            let mut state = self.state.lock();
            let protocol = match state.active(generation) {
                Some(conn) if conn.session.is_some() && !state.is_disconnecting => conn.protocol,
                _ => {
                    tracing::warn!(
                        message_id = %frame.message_id,
                        "Message received after connection was closed"
                    );
                    return;
                }
            };
            state.has_streaming_started = true;

            let outcome = payload::decode_frame(frame, protocol);
            if let Ok(message) = &outcome {
                state.session.last_message_id = Some(message.message_id.clone());
            }
            outcome
        };

        match outcome {
            Ok(message) => {
                metrics::record_frame_received(message.data_format);
                let callback = self.callbacks.read().received.clone();
                if let Some(callback) = callback {
                    callback(message);
                }
            }
            Err(e) => {
                metrics::record_parse_failure();
                tracing::error!(error = %e, payload = %e.payload(), "Failed to parse streaming message");
                self.stop(Some(TransportError::MalformedPayload(e.to_string())));
            }
        }
    }

    /// A stream item that is not a frame at all aborts the session like a
    /// payload that does not parse.
    fn handle_invalid_item(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let state = self.state.lock();
            if state.is_disconnecting || state.active(generation).is_none() {
                tracing::debug!(reason, "Invalid stream item after connection was closed");
                return;
            }
        }
        metrics::record_parse_failure();
        tracing::error!(reason, "Invalid streaming message");
        self.stop(Some(TransportError::MalformedPayload(reason.to_string())));
    }

    fn handle_message_stream_error(self: &Arc<Self>, generation: u64, error: &HubError) {
        let should_stop = {
            let mut state = self.state.lock();
            let started = state.has_streaming_started;
            match state.active_mut(generation) {
                Some(conn) if !started => {
                    conn.stream_id = None;
                    true
                }
                _ => false,
            }
        };

        if should_stop {
            tracing::error!(error = %error, "Message stream failed before streaming started");
            self.stop(None);
        } else {
            tracing::debug!(error = %error, "Message stream error");
        }
    }

    fn handle_message_stream_complete(self: &Arc<Self>, generation: u64) {
        let should_stop = {
            let mut state = self.state.lock();
            let disconnecting = state.is_disconnecting;
            match state.active_mut(generation) {
                Some(conn) => {
                    conn.stream_id = None;
                    !disconnecting
                }
                None => false,
            }
        };

        if should_stop {
            tracing::info!("Message stream completed by server");
            self.stop(None);
        }
    }

    // -------------------------------------------------------------------------
    // Reconnect
    // -------------------------------------------------------------------------

    async fn reconnect(
        self: &Arc<Self>,
        generation: u64,
        mut error: HubError,
        options: &TransportOptions,
        cancel: &CancellationToken,
    ) -> Option<HubConnection> {
        {
            let mut state = self.state.lock();
            let conn = state.active_mut(generation)?;
            conn.session = None;
            conn.stream_id = None;
        }

        let mut attempt: u32 = 0;
        loop {
            let delay = {
                let state = self.state.lock();
                if state.is_disconnecting || cancel.is_cancelled() {
                    None
                } else {
                    self.retry_policy.next_retry_delay(
                        attempt,
                        &state.session,
                        chrono::Utc::now().timestamp_millis(),
                    )
                }
            };
            let Some(delay) = delay else {
                self.handle_connection_closure(generation, Some(&error));
                return None;
            };

            if attempt == 0 {
                self.on_reconnecting(generation, &error);
            }
            metrics::record_reconnect_attempt();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting hub connection"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.handle_connection_closure(generation, None);
                    return None;
                }
                () = tokio::time::sleep(delay) => {}
            }

            let request = self.connect_request(generation, options)?;
            match self.connect(request, cancel).await {
                None => {
                    self.handle_connection_closure(generation, None);
                    return None;
                }
                Some(Ok(connection)) => {
                    tracing::info!(attempts = attempt + 1, "Hub connection restored");
                    return Some(connection);
                }
                Some(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    error = e;
                    attempt += 1;
                }
            }
        }
    }

    fn on_reconnecting(&self, generation: u64, error: &HubError) {
        tracing::warn!(error = %error, "Hub connection lost, attempting to reconnect");
        if !self.set_state_if_current(generation, ConnectionState::Reconnecting) {
            return;
        }

        let mut state = self.state.lock();
        let last_message_id = state.session.last_message_id.clone();
        if let Some(conn) = state.active_mut(generation) {
            conn.url = with_message_id(&conn.url, last_message_id.as_deref());
        }
    }

    // -------------------------------------------------------------------------
    // Token renewal
    // -------------------------------------------------------------------------

    fn renew_session(self: &Arc<Self>) {
        let target = {
            let state = self.state.lock();
            state.connection.as_ref().and_then(|conn| {
                let session = conn.session.clone()?;
                state
                    .is_connected(conn.generation)
                    .then(|| (conn.generation, session))
            })
        };

        let Some((generation, session)) = target else {
            tracing::debug!("Skipping token renewal, not connected");
            return;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_renewal(generation, session).await });
    }

    async fn run_renewal(self: Arc<Self>, generation: u64, session: Arc<dyn HubSession>) {
        loop {
            let token = {
                let state = self.state.lock();
                if !state.is_current_session(generation, &session) {
                    return;
                }
                state.session.auth_token.clone()
            };
            let Some(token) = token else {
                tracing::debug!("Skipping token renewal, no token");
                return;
            };

            match session.renew_token(&token).await {
                Ok(response) => {
                    self.handle_renew_response(RenewStatus::from(response.status), &token);
                    return;
                }
                Err(e) => {
                    if !self.state.lock().is_current_session(generation, &session) {
                        tracing::debug!(error = %e, "Token renewal abandoned, connection closed");
                        return;
                    }
                    tracing::warn!(error = %e, "Token renewal failed, retrying");
                    tokio::time::sleep(RENEW_RETRY_DELAY).await;
                }
            }
        }
    }

    fn handle_renew_response(self: &Arc<Self>, status: RenewStatus, renewed: &AccessToken) {
        metrics::record_token_renewal(status);
        let current = self.state.lock().session.auth_token.clone();

        match RenewAction::decide(status, renewed, current.as_ref()) {
            RenewAction::Continue => {
                tracing::debug!(status = status.as_str(), "Token renewal answered");
            }
            RenewAction::NotifyUnauthorized => {
                tracing::warn!("Token renewal rejected");
                let callback = self.callbacks.read().unauthorized.clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
            RenewAction::Restart => {
                tracing::info!("Streaming session not found on server, restarting");
                self.stop(None);
            }
            RenewAction::Fail(code) => {
                tracing::error!(status = code, "Unexpected token renewal status");
                self.stop(Some(TransportError::UnexpectedRenewStatus(code)));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stop and closure
    // -------------------------------------------------------------------------

    fn stop(self: &Arc<Self>, failure: Option<TransportError>) {
        let (session, stream_id) = {
            let mut state = self.state.lock();
            let Some(conn) = state.connection.as_mut() else {
                tracing::warn!("Stop requested but there is no connection");
                return;
            };
            conn.cancel.cancel();
            let session = conn.session.clone();
            let stream_id = conn.stream_id.take();

            state.is_disconnecting = true;
            if failure.is_some() {
                state.pending_failure = failure;
            }
            (session, stream_id)
        };

        let Some(session) = session else {
            tracing::debug!("Stop requested while no session is live");
            return;
        };

        tracing::info!("Stopping hub connection");
        tokio::spawn(async move {
            if let Some(stream_id) = stream_id
                && let Err(e) = session.cancel_stream(&stream_id).await
            {
                tracing::debug!(error = %e, "Failed to cancel message stream");
            }
            if let Err(e) = session.close_connection().await {
                tracing::info!(error = %e, "Error occurred while invoking CloseConnection");
            }
            session.stop().await;
        });
    }

    fn handle_connection_closure(&self, generation: u64, error: Option<&HubError>) {
        if let Some(error) = error {
            tracing::error!(error = %error, "Hub connection closed abruptly");
        }

        let failure = {
            let _emitting = self.emitting.lock();
            let failure = {
                let mut state = self.state.lock();
                if state.active(generation).is_none() {
                    return;
                }
                state.connection = None;
                state.session.last_message_id = None;
                state.is_disconnecting = false;
                state.has_streaming_started = false;
                state.pending_failure.take()
            };
            if failure.is_none() {
                self.set_state(ConnectionState::Disconnected);
            }
            failure
        };

        if let Some(failure) = failure {
            tracing::info!(error = %failure, "Hub transport failed");
            (self.on_failure)(failure);
        }
    }

    /// Drop a connection that never came up.
    fn discard_connection(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.active(generation).is_some() {
            state.connection = None;
            state.is_disconnecting = false;
            state.has_streaming_started = false;
            state.pending_failure = None;
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    fn set_state(&self, new_state: ConnectionState) {
        let _emitting = self.emitting.lock();
        self.state.lock().connection_state = new_state;
        self.emit_state(new_state);
    }

    fn set_state_if_current(&self, generation: u64, new_state: ConnectionState) -> bool {
        let _emitting = self.emitting.lock();
        {
            let mut state = self.state.lock();
            if state.active(generation).is_none() {
                return false;
            }
            state.connection_state = new_state;
        }
        self.emit_state(new_state);
        true
    }

    fn emit_state(&self, new_state: ConnectionState) {
        metrics::set_connection_state(new_state);
        let callback = self.callbacks.read().state_changed.clone();
        if let Some(callback) = callback {
            callback(new_state);
        }
    }
}

async fn next_frame(frames: &mut Option<FrameStream>) -> Option<Result<RawFrame, HubError>> {
    match frames {
        Some(frames) => frames.next().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds [`HubTransport`]s for one physical transport type.
pub struct HubTransportBuilder {
    connector: Arc<dyn HubConnector>,
    platform: PlatformCapabilities,
    transport_type: HubTransportType,
    retry_policy: RetryPolicy,
}

impl HubTransportBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(
        connector: Arc<dyn HubConnector>,
        platform: PlatformCapabilities,
        transport_type: HubTransportType,
    ) -> Self {
        Self {
            connector,
            platform,
            transport_type,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Use a custom retry policy for built transports.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl TransportBuilder for HubTransportBuilder {
    fn is_supported(&self) -> bool {
        self.platform.supports_hub() && self.connector.supports(self.transport_type)
    }

    fn build(
        &self,
        base_url: &str,
        on_failure: TransportFailureCallback,
    ) -> Arc<dyn StreamingTransport> {
        Arc::new(HubTransport::with_retry_policy(
            base_url,
            Arc::clone(&self.connector),
            on_failure,
            self.retry_policy.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_appended() {
        assert_eq!(
            with_message_id("https://host/streaming?contextId=c1", Some("17")),
            "https://host/streaming?contextId=c1&messageId=17"
        );
    }

    #[test]
    fn message_id_replaces_previous() {
        assert_eq!(
            with_message_id(
                "https://host/streaming?contextId=c1&messageId=17",
                Some("42")
            ),
            "https://host/streaming?contextId=c1&messageId=42"
        );
    }

    #[test]
    fn message_id_removed_when_absent() {
        assert_eq!(
            with_message_id("https://host/streaming?contextId=c1&messageId=17", None),
            "https://host/streaming?contextId=c1"
        );
    }
}
