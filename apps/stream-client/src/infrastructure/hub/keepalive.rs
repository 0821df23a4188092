//! Hub Keep-Alive
//!
//! The client pings the server on a fixed interval; the connection counts as
//! lost when nothing at all has arrived from the server within the server
//! timeout. Any received message, not only pings, resets the timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);
/// Default server timeout.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// Silence from the server after which the connection is lost.
    pub server_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }
}

impl KeepAliveConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, server_timeout: Duration) -> Self {
        Self {
            ping_interval,
            server_timeout,
        }
    }
}

/// Events emitted by the keep-alive monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// Send a ping.
    SendPing,
    /// The server went silent.
    Timeout,
}

/// Time of the last message from the server, shared with the socket reader.
#[derive(Debug)]
pub struct KeepAliveState {
    last_received: RwLock<Instant>,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAliveState {
    /// Create new state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_received: RwLock::new(Instant::now()),
        }
    }

    /// Record that something arrived from the server.
    pub fn record_received(&self) {
        *self.last_received.write() = Instant::now();
    }

    /// Time since the server last sent anything.
    #[must_use]
    pub fn time_since_received(&self) -> Duration {
        self.last_received.read().elapsed()
    }
}

/// Periodically requests pings and detects server silence.
pub struct KeepAliveMonitor {
    config: KeepAliveConfig,
    state: Arc<KeepAliveState>,
    event_tx: mpsc::Sender<KeepAliveEvent>,
    cancel: CancellationToken,
}

impl KeepAliveMonitor {
    /// Create a new monitor.
    #[must_use]
    pub const fn new(
        config: KeepAliveConfig,
        state: Arc<KeepAliveState>,
        event_tx: mpsc::Sender<KeepAliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, until the event receiver is gone, or until a
    /// timeout is reported.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should exit.
    async fn tick(&self) -> bool {
        let silence = self.state.time_since_received();
        if silence > self.config.server_timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.server_timeout.as_secs(),
                "Server timeout detected"
            );
            let _ = self.event_tx.send(KeepAliveEvent::Timeout).await;
            return false;
        }

        if self.event_tx.send(KeepAliveEvent::SendPing).await.is_err() {
            tracing::debug!("Keep-alive channel closed");
            return false;
        }
        true
    }
}
