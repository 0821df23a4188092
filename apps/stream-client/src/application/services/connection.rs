//! Connection Facade
//!
//! Owns an ordered list of transport candidates and exactly one active
//! transport. When the active transport reports failure the facade moves to
//! the next supported candidate, rewires the caller's callbacks onto it and,
//! if the caller had started streaming, restarts it with the current session
//! credentials. When no candidate is left the total-failure callback fires,
//! at most once per facade.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Started ──stop──► Stopped
//!    └────────────────┴─────────────────┴──dispose──► Disposed
//! ```
//!
//! After `dispose` every callback from the transport is logged and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::registry::{TransportCandidate, TransportRegistry};
use crate::application::ports::{
    ConnectionSlowCallback, ReceivedCallback, StartedCallback, StateChangedCallback,
    StreamingTransport, TransportCallbacks, TransportError, TransportOptions,
    UnauthorizedCallback,
};
use crate::domain::connection::{
    ConnectionState, HubProtocol, HubTransportType, StreamingMessage, TransportKind,
};
use crate::infrastructure::metrics;

/// Handler invoked when no transport candidate is left.
pub type TotalFailureCallback = Arc<dyn Fn() + Send + Sync>;

/// Caller-supplied facade options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Candidate names in order; the default pair when `None`.
    pub transports: Option<Vec<TransportKind>>,
    /// Overrides the candidate's physical hub transport.
    pub transport_type: Option<HubTransportType>,
    /// Overrides the candidate's negotiation setting.
    pub skip_negotiation: Option<bool>,
    /// Hub wire sub-protocol.
    pub protocol: Option<HubProtocol>,
}

impl ConnectionOptions {
    /// Candidate defaults overridden by every value set here.
    #[must_use]
    pub fn merge_into(&self, defaults: TransportOptions) -> TransportOptions {
        TransportOptions {
            transport_type: self.transport_type.or(defaults.transport_type),
            skip_negotiation: self.skip_negotiation.unwrap_or(defaults.skip_negotiation),
            protocol: self.protocol.or(defaults.protocol),
        }
    }
}

/// Facade lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    /// Constructed, not started.
    Created,
    /// Streaming was requested.
    Started,
    /// Streaming was stopped by the caller.
    Stopped,
    /// Terminal; callbacks are suppressed.
    Disposed,
}

/// Session credentials last passed to [`Connection::update_query`].
#[derive(Clone, PartialEq, Eq)]
pub struct QueryParams {
    /// Token as supplied by the caller.
    pub auth_token: String,
    /// Session scope.
    pub context_id: String,
    /// Token expiry, epoch milliseconds.
    pub auth_expiry: i64,
}

impl std::fmt::Debug for QueryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryParams")
            .field("auth_token", &"[REDACTED]")
            .field("context_id", &self.context_id)
            .field("auth_expiry", &self.auth_expiry)
            .finish()
    }
}

struct Active {
    index: usize,
    transport: Arc<dyn StreamingTransport>,
}

struct FacadeCore {
    lifecycle: FacadeState,
    /// Position in the candidate list; only ever increases.
    index: Option<usize>,
    active: Option<Active>,
    session: Option<QueryParams>,
    on_started: Option<StartedCallback>,
    state: ConnectionState,
}

struct FacadeInner {
    base_url: String,
    options: ConnectionOptions,
    candidates: Vec<TransportCandidate>,
    on_total_failure: TotalFailureCallback,
    total_failure_reported: AtomicBool,
    disposed: AtomicBool,
    slots: RwLock<TransportCallbacks>,
    core: Mutex<FacadeCore>,
    weak_self: Weak<FacadeInner>,
}

/// Streaming connection facade.
pub struct Connection {
    inner: Arc<FacadeInner>,
}

impl Connection {
    /// Build the facade and instantiate the first supported candidate.
    ///
    /// Invokes `on_total_failure` before returning when no candidate is
    /// supported.
    #[must_use]
    pub fn new(
        options: ConnectionOptions,
        base_url: &str,
        registry: &TransportRegistry,
        on_total_failure: TotalFailureCallback,
    ) -> Self {
        let kinds = options
            .transports
            .clone()
            .unwrap_or_else(|| TransportKind::DEFAULTS.to_vec());
        let candidates = registry.candidates(&kinds);

        let inner = Arc::new_cyclic(|weak_self| FacadeInner {
            base_url: base_url.trim_end_matches('/').to_string(),
            options,
            candidates,
            on_total_failure,
            total_failure_reported: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            slots: RwLock::new(TransportCallbacks::default()),
            core: Mutex::new(FacadeCore {
                lifecycle: FacadeState::Created,
                index: None,
                active: None,
                session: None,
                on_started: None,
                state: ConnectionState::Initializing,
            }),
            weak_self: weak_self.clone(),
        });

        match inner.create_transport() {
            Some(kind) => {
                tracing::debug!(transport = %kind, "Supported transport found");
            }
            None => {
                tracing::error!(
                    url = %inner.base_url,
                    enabled_transports = ?kinds,
                    "Unable to set up initial transport, no supported transport found"
                );
                inner.report_total_failure();
            }
        }

        Self { inner }
    }

    /// Start streaming on the active transport.
    pub fn start(&self, on_started: Option<StartedCallback>) {
        let on_started = on_started.map(|callback| self.inner.guard_started(callback));
        let target = {
            let mut core = self.inner.core.lock();
            let Some(active) = &core.active else {
                return;
            };
            let target = (
                Arc::clone(&active.transport),
                self.inner.transport_options(active.index),
            );
            core.lifecycle = FacadeState::Started;
            core.on_started.clone_from(&on_started);
            target
        };

        let (transport, options) = target;
        transport.start(options, on_started);
    }

    /// Stop streaming on the active transport.
    pub fn stop(&self) {
        let transport = {
            let mut core = self.inner.core.lock();
            let Some(active) = &core.active else {
                return;
            };
            let transport = Arc::clone(&active.transport);
            core.lifecycle = FacadeState::Stopped;
            transport
        };
        transport.stop(false);
    }

    /// Suppress every later callback. Does not stop the transport.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.core.lock().lifecycle = FacadeState::Disposed;
    }

    /// Record session credentials and pass them to the active transport.
    pub fn update_query(&self, auth_token: &str, context_id: &str, auth_expiry: i64, force_auth: bool) {
        tracing::debug!(context_id, auth_expiry, "Connection update query");
        let transport = {
            let mut core = self.inner.core.lock();
            core.session = Some(QueryParams {
                auth_token: auth_token.to_string(),
                context_id: context_id.to_string(),
                auth_expiry,
            });
            core.active.as_ref().map(|active| Arc::clone(&active.transport))
        };

        if let Some(transport) = transport {
            transport.update_query(auth_token, context_id, auth_expiry, force_auth);
        }
    }

    /// Query string of the active transport's connection.
    #[must_use]
    pub fn get_query(&self) -> Option<String> {
        self.inner.active_transport()?.get_query()
    }

    /// Forward an orphaned-subscription notice to the active transport.
    pub fn on_orphan_found(&self) {
        if let Some(transport) = self.inner.active_transport() {
            transport.on_orphan_found();
        }
    }

    /// Forward a subscribe network error to the active transport.
    pub fn on_subscribe_network_error(&self) {
        if let Some(transport) = self.inner.active_transport() {
            transport.on_subscribe_network_error();
        }
    }

    /// Name of the physical transport in use.
    #[must_use]
    pub fn get_transport(&self) -> Option<String> {
        let transport = self.inner.active_transport()?;
        Some(
            transport
                .underlying_transport()
                .unwrap_or_else(|| transport.name().to_string()),
        )
    }

    /// Install the envelope handler.
    pub fn set_received_callback(&self, callback: ReceivedCallback) {
        self.inner.slots.write().received = Some(callback);
    }

    /// Install the state transition handler.
    pub fn set_state_changed_callback(&self, callback: StateChangedCallback) {
        self.inner.slots.write().state_changed = Some(callback);
    }

    /// Install the authentication rejection handler.
    pub fn set_unauthorized_callback(&self, callback: UnauthorizedCallback) {
        self.inner.slots.write().unauthorized = Some(callback);
    }

    /// Install the slow-connection handler.
    pub fn set_connection_slow_callback(&self, callback: ConnectionSlowCallback) {
        self.inner.slots.write().connection_slow = Some(callback);
    }

    /// Last state reported by the active transport.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Facade lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> FacadeState {
        self.inner.core.lock().lifecycle
    }

    /// Name of the active candidate.
    #[must_use]
    pub fn transport_name(&self) -> Option<TransportKind> {
        let core = self.inner.core.lock();
        core.active
            .as_ref()
            .map(|active| self.inner.candidates[active.index].kind)
    }

    /// Credentials last passed to [`Connection::update_query`].
    #[must_use]
    pub fn session(&self) -> Option<QueryParams> {
        self.inner.core.lock().session.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Connection")
            .field("base_url", &self.inner.base_url)
            .field("lifecycle", &core.lifecycle)
            .field("index", &core.index)
            .field("state", &core.state)
            .finish_non_exhaustive()
    }
}

impl FacadeInner {
    // -------------------------------------------------------------------------
    // Candidate selection
    // -------------------------------------------------------------------------

    /// Advance to the next supported candidate and make it active.
    fn create_transport(&self) -> Option<TransportKind> {
        let mut core = self.core.lock();
        core.active = None;

        loop {
            let next = core.index.map_or(0, |index| index + 1);
            if next >= self.candidates.len() {
                core.index = Some(self.candidates.len());
                return None;
            }
            core.index = Some(next);

            let candidate = &self.candidates[next];
            if !candidate.builder.is_supported() {
                tracing::debug!(transport = %candidate.kind, "Transport not supported, trying next");
                continue;
            }

            let weak = self.weak_self.clone();
            let transport = candidate.builder.build(
                &self.base_url,
                Arc::new(move |error: TransportError| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_transport_failure(next, &error);
                    }
                }),
            );
            self.wire(next, transport.as_ref());
            core.active = Some(Active {
                index: next,
                transport,
            });
            return Some(candidate.kind);
        }
    }

    fn on_transport_failure(&self, failed_index: usize, error: &TransportError) {
        {
            let core = self.core.lock();
            if core.active.as_ref().map(|active| active.index) != Some(failed_index) {
                tracing::debug!(error = %error, index = failed_index, "Ignoring failure from inactive transport");
                return;
            }
            tracing::info!(
                error = %error,
                url = %self.base_url,
                index = failed_index,
                transport = %self.candidates[failed_index].kind,
                context_id = core.session.as_ref().map(|s| s.context_id.as_str()),
                "Transport failed"
            );
        }
        metrics::record_transport_fallback(self.candidates[failed_index].kind);

        if self.disposed.load(Ordering::SeqCst) {
            tracing::warn!("Transport failed after the connection was disposed");
            return;
        }

        let Some(kind) = self.create_transport() else {
            tracing::warn!(error = %error, url = %self.base_url, "Next supported transport not found");
            self.report_total_failure();
            return;
        };
        tracing::debug!(transport = %kind, "Next supported transport found");

        let restart = {
            let core = self.core.lock();
            match (&core.active, core.lifecycle) {
                (Some(active), FacadeState::Started) => Some((
                    Arc::clone(&active.transport),
                    self.transport_options(active.index),
                    core.session.clone(),
                    core.on_started.clone(),
                )),
                _ => None,
            }
        };

        if let Some((transport, options, session, on_started)) = restart {
            if let Some(session) = session {
                transport.update_query(
                    &session.auth_token,
                    &session.context_id,
                    session.auth_expiry,
                    false,
                );
            }
            transport.start(options, on_started);
        }
    }

    fn report_total_failure(&self) {
        if self.total_failure_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.on_total_failure)();
    }

    fn transport_options(&self, index: usize) -> TransportOptions {
        self.options.merge_into(self.candidates[index].options)
    }

    fn active_transport(&self) -> Option<Arc<dyn StreamingTransport>> {
        self.core
            .lock()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.transport))
    }

    // -------------------------------------------------------------------------
    // Callback dispatch
    // -------------------------------------------------------------------------

    /// Install dispatchers that route the transport's events to the caller's
    /// current handlers.
    fn wire(&self, index: usize, transport: &dyn StreamingTransport) {
        let weak = self.weak_self.clone();
        transport.set_received_callback(Arc::new(move |message: StreamingMessage| {
            if let Some(inner) = weak.upgrade()
                && inner.accepts(index, "receivedCallback")
            {
                let callback = inner.slots.read().received.clone();
                if let Some(callback) = callback {
                    callback(message);
                }
            }
        }));

        let weak = self.weak_self.clone();
        transport.set_state_changed_callback(Arc::new(move |state: ConnectionState| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_active(index) {
                return;
            }
            inner.core.lock().state = state;
            if inner.accepts(index, "stateChangedCallback") {
                let callback = inner.slots.read().state_changed.clone();
                if let Some(callback) = callback {
                    callback(state);
                }
            }
        }));

        let weak = self.weak_self.clone();
        transport.set_unauthorized_callback(Arc::new(move || {
            if let Some(inner) = weak.upgrade()
                && inner.accepts(index, "unauthorizedCallback")
            {
                let callback = inner.slots.read().unauthorized.clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
        }));

        let weak = self.weak_self.clone();
        transport.set_connection_slow_callback(Arc::new(move || {
            if let Some(inner) = weak.upgrade()
                && inner.accepts(index, "connectionSlowCallback")
            {
                let callback = inner.slots.read().connection_slow.clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
        }));
    }

    fn is_active(&self, index: usize) -> bool {
        self.core.lock().active.as_ref().map(|active| active.index) == Some(index)
    }

    /// Check if an event from the transport at `index` may reach the caller.
    fn accepts(&self, index: usize, callback: &'static str) -> bool {
        if !self.is_active(index) {
            tracing::debug!(callback, index, "Dropping callback from inactive transport");
            return false;
        }
        if self.disposed.load(Ordering::SeqCst) {
            let core = self.core.lock();
            tracing::warn!(
                callback,
                transport = %self.candidates[index].kind,
                context_id = core.session.as_ref().map(|s| s.context_id.as_str()),
                "Callback called after transport was disposed"
            );
            return false;
        }
        true
    }

    fn guard_started(&self, callback: StartedCallback) -> StartedCallback {
        let weak = self.weak_self.clone();
        Arc::new(move || {
            let disposed = weak
                .upgrade()
                .is_none_or(|inner| inner.disposed.load(Ordering::SeqCst));
            if disposed {
                tracing::warn!(callback = "startCallback", "Callback called after transport was disposed");
                return;
            }
            callback();
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
