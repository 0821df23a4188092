//! Stream Client Configuration Settings
//!
//! Loaded from environment variables (after `.env` files are applied by the
//! binary).
//!
//! | Variable | Default |
//! |----------|---------|
//! | `STREAMING_BASE_URL` | required |
//! | `STREAMING_AUTH_TOKEN` | required |
//! | `STREAMING_CONTEXT_ID` | `ctx-<unix-ms>` |
//! | `STREAMING_AUTH_EXPIRY_MS` | now + 1 h |
//! | `STREAMING_TRANSPORTS` | `hubWebSockets,hubLongPolling` |
//! | `STREAMING_PROTOCOL` | `json` |
//! | `STREAMING_KEEPALIVE_INTERVAL_SECS` | 15 |
//! | `STREAMING_SERVER_TIMEOUT_SECS` | 30 |
//! | `STREAMING_METRICS_PORT` | 0 (disabled) |

use std::time::Duration;

use crate::domain::connection::{AccessToken, HubProtocol, TransportKind};
use crate::infrastructure::hub::keepalive::{
    DEFAULT_PING_INTERVAL, DEFAULT_SERVER_TIMEOUT, KeepAliveConfig,
};

const DEFAULT_TOKEN_LIFETIME_MS: i64 = 60 * 60 * 1000;

/// Transports tried by the binary when none are configured.
pub const DEFAULT_TRANSPORTS: [TransportKind; 2] =
    [TransportKind::HubWebSocket, TransportKind::HubLongPolling];

/// Credentials and scope of the initial session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bearer token.
    pub auth_token: AccessToken,
    /// Session scope.
    pub context_id: String,
    /// Token expiry, epoch milliseconds.
    pub auth_expiry_ms: i64,
}

/// Hub keep-alive settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveSettings {
    /// Client ping interval.
    pub interval: Duration,
    /// Server silence before the connection counts as lost.
    pub server_timeout: Duration,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PING_INTERVAL,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }
}

impl From<KeepAliveSettings> for KeepAliveConfig {
    fn from(settings: KeepAliveSettings) -> Self {
        Self::new(settings.interval, settings.server_timeout)
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Streaming service base URL.
    pub base_url: String,
    /// Initial session.
    pub session: SessionSettings,
    /// Transport candidates in order.
    pub transports: Vec<TransportKind>,
    /// Hub wire sub-protocol.
    pub protocol: HubProtocol,
    /// Hub keep-alive timing.
    pub keep_alive: KeepAliveSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl StreamClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or if a
    /// value cannot be interpreted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`StreamClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required(&lookup, "STREAMING_BASE_URL")?;
        let auth_token = required(&lookup, "STREAMING_AUTH_TOKEN")?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let context_id = lookup("STREAMING_CONTEXT_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("ctx-{now_ms}"));

        let auth_expiry_ms = match lookup("STREAMING_AUTH_EXPIRY_MS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue("STREAMING_AUTH_EXPIRY_MS".to_string(), raw))?,
            None => now_ms + DEFAULT_TOKEN_LIFETIME_MS,
        };

        let transports = lookup("STREAMING_TRANSPORTS")
            .map(|raw| parse_transports(&raw))
            .filter(|kinds| !kinds.is_empty())
            .unwrap_or_else(|| DEFAULT_TRANSPORTS.to_vec());

        let protocol = match lookup("STREAMING_PROTOCOL") {
            Some(raw) => HubProtocol::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("STREAMING_PROTOCOL".to_string(), raw))?,
            None => HubProtocol::default(),
        };

        let keep_alive = KeepAliveSettings {
            interval: parse_duration_secs(
                &lookup,
                "STREAMING_KEEPALIVE_INTERVAL_SECS",
                KeepAliveSettings::default().interval,
            ),
            server_timeout: parse_duration_secs(
                &lookup,
                "STREAMING_SERVER_TIMEOUT_SECS",
                KeepAliveSettings::default().server_timeout,
            ),
        };

        let metrics_port = lookup("STREAMING_METRICS_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session: SessionSettings {
                auth_token: AccessToken::new(auth_token),
                context_id,
                auth_expiry_ms,
            },
            transports,
            protocol,
            keep_alive,
            metrics_port,
        })
    }

    /// Check if the metrics exporter should run.
    #[must_use]
    pub const fn metrics_enabled(&self) -> bool {
        self.metrics_port != 0
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(String, String),
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.trim().to_string())
}

fn parse_transports(raw: &str) -> Vec<TransportKind> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let kind = TransportKind::parse(name);
            if kind.is_none() {
                tracing::warn!(transport = name, "Ignoring unknown transport name");
            }
            kind
        })
        .collect()
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("STREAMING_BASE_URL", "https://streaming.example.com/openapi/"),
        ("STREAMING_AUTH_TOKEN", "BEARER abc"),
    ];

    #[test]
    fn defaults_with_required_only() {
        let config = tokio_test::assert_ok!(StreamClientConfig::from_lookup(lookup_from(&REQUIRED)));

        assert_eq!(config.base_url, "https://streaming.example.com/openapi");
        assert_eq!(config.session.auth_token.as_str(), "abc");
        assert!(config.session.context_id.starts_with("ctx-"));
        assert!(config.session.auth_expiry_ms > chrono::Utc::now().timestamp_millis());
        assert_eq!(config.transports, DEFAULT_TRANSPORTS.to_vec());
        assert_eq!(config.protocol, HubProtocol::Json);
        assert_eq!(config.keep_alive, KeepAliveSettings::default());
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn missing_base_url() {
        let err = StreamClientConfig::from_lookup(lookup_from(&[("STREAMING_AUTH_TOKEN", "t")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "STREAMING_BASE_URL"));
    }

    #[test]
    fn empty_token() {
        let err = StreamClientConfig::from_lookup(lookup_from(&[
            ("STREAMING_BASE_URL", "https://host"),
            ("STREAMING_AUTH_TOKEN", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "STREAMING_AUTH_TOKEN"));
    }

    #[test]
    fn transports_parsed_in_order_skipping_unknown() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STREAMING_TRANSPORTS", "HubLongPolling, carrierPigeon ,hubWebSockets"));
        let config = tokio_test::assert_ok!(StreamClientConfig::from_lookup(lookup_from(&pairs)));

        assert_eq!(
            config.transports,
            vec![TransportKind::HubLongPolling, TransportKind::HubWebSocket]
        );
    }

    #[test]
    fn explicit_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("STREAMING_CONTEXT_ID", "ctx-fixed"),
            ("STREAMING_AUTH_EXPIRY_MS", "1700000000000"),
            ("STREAMING_PROTOCOL", "MessagePack"),
            ("STREAMING_KEEPALIVE_INTERVAL_SECS", "5"),
            ("STREAMING_SERVER_TIMEOUT_SECS", "12"),
            ("STREAMING_METRICS_PORT", "9100"),
        ]);
        let config = StreamClientConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.session.context_id, "ctx-fixed");
        assert_eq!(config.session.auth_expiry_ms, 1_700_000_000_000);
        assert_eq!(config.protocol, HubProtocol::MessagePack);
        assert_eq!(config.keep_alive.interval, Duration::from_secs(5));
        assert_eq!(config.keep_alive.server_timeout, Duration::from_secs(12));
        assert_eq!(config.metrics_port, 9100);
        assert!(config.metrics_enabled());
    }

    #[test]
    fn invalid_protocol() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STREAMING_PROTOCOL", "xml"));
        let err = StreamClientConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "STREAMING_PROTOCOL"));
    }

    #[test]
    fn token_debug_is_redacted() {
        let config = StreamClientConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("abc"));
    }
}
