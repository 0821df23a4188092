//! Configuration Module
//!
//! Environment-driven settings for the streaming client binary.

mod settings;

pub use settings::{ConfigError, KeepAliveSettings, SessionSettings, StreamClientConfig};
