//! Stream Client Binary
//!
//! Opens a streaming session and logs every delivered message until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAMING_BASE_URL`: streaming service base URL
//! - `STREAMING_AUTH_TOKEN`: bearer token
//!
//! ## Optional
//! - `STREAMING_CONTEXT_ID`: session scope (default: generated)
//! - `STREAMING_AUTH_EXPIRY_MS`: token expiry (default: now + 1 h)
//! - `STREAMING_TRANSPORTS`: candidates in order (default: hubWebSockets,hubLongPolling)
//! - `STREAMING_PROTOCOL`: json | messagepack (default: json)
//! - `STREAMING_KEEPALIVE_INTERVAL_SECS`: ping interval (default: 15)
//! - `STREAMING_SERVER_TIMEOUT_SECS`: server silence timeout (default: 30)
//! - `STREAMING_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: extra log directives

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use stream_client::infrastructure::metrics;
use stream_client::infrastructure::telemetry;
use stream_client::{
    Connection, ConnectionOptions, ConnectionState, HubConnector, HubTransportBuilder,
    HubTransportType, PlatformCapabilities, StreamClientConfig, StreamingMessage, TransportKind,
    TransportRegistry, WsHubConnector,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long to wait for the transport to disconnect on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting stream client");

    let config = StreamClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_enabled()
        && let Err(e) = metrics::install_exporter(config.metrics_port)
    {
        tracing::warn!(error = %e, "Failed to start Prometheus exporter, continuing without it");
    }

    let registry = build_registry(&config);
    let total_failure = CancellationToken::new();
    let on_total_failure = {
        let total_failure = total_failure.clone();
        Arc::new(move || total_failure.cancel())
    };

    let connection = Connection::new(
        ConnectionOptions {
            transports: Some(config.transports.clone()),
            protocol: Some(config.protocol),
            ..ConnectionOptions::default()
        },
        &config.base_url,
        &registry,
        on_total_failure,
    );

    let (state_tx, mut state_rx) = watch::channel(connection.state());
    install_callbacks(&connection, state_tx);

    connection.update_query(
        config.session.auth_token.as_str(),
        &config.session.context_id,
        config.session.auth_expiry_ms,
        false,
    );
    connection.start(Some(Arc::new(|| tracing::info!("Streaming started"))));

    tokio::select! {
        () = await_shutdown() => {}
        () = total_failure.cancelled() => {
            connection.dispose();
            return Err(anyhow!("no streaming transport could be established"));
        }
    }

    connection.stop();
    let timed_out = tokio::time::timeout(
        SHUTDOWN_TIMEOUT,
        state_rx.wait_for(|state| *state == ConnectionState::Disconnected),
    )
    .await
    .is_err();
    if timed_out {
        tracing::warn!("Transport did not disconnect before the shutdown timeout");
    }
    connection.dispose();

    tracing::info!("Stream client shutdown complete");
    Ok(())
}

fn build_registry(config: &StreamClientConfig) -> TransportRegistry {
    let connector: Arc<dyn HubConnector> =
        Arc::new(WsHubConnector::new(config.keep_alive.into()));
    let platform = PlatformCapabilities::native();

    TransportRegistry::new()
        .with(
            TransportKind::HubWebSocket,
            Arc::new(HubTransportBuilder::new(
                Arc::clone(&connector),
                platform,
                HubTransportType::WebSockets,
            )),
        )
        .with(
            TransportKind::HubLongPolling,
            Arc::new(HubTransportBuilder::new(
                connector,
                platform,
                HubTransportType::LongPolling,
            )),
        )
}

fn install_callbacks(connection: &Connection, state_tx: watch::Sender<ConnectionState>) {
    connection.set_received_callback(Arc::new(|message: StreamingMessage| {
        tracing::info!(
            reference_id = %message.reference_id,
            message_id = %message.message_id,
            format = message.data_format.as_str(),
            "Message received"
        );
        tracing::debug!(data = ?message.data, "Message payload");
    }));

    connection.set_state_changed_callback(Arc::new(move |state: ConnectionState| {
        tracing::info!(state = %state, "Connection state changed");
        state_tx.send_replace(state);
    }));

    connection.set_unauthorized_callback(Arc::new(|| {
        tracing::warn!("Streaming token rejected, a fresh token is required");
    }));

    connection.set_connection_slow_callback(Arc::new(|| {
        tracing::warn!("Streaming connection is slow");
    }));
}

/// Log the parsed configuration.
fn log_config(config: &StreamClientConfig) {
    let transports: Vec<_> = config.transports.iter().map(TransportKind::as_str).collect();
    tracing::info!(
        base_url = %config.base_url,
        context_id = %config.session.context_id,
        transports = ?transports,
        protocol = config.protocol.name(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
