//! Error types for configuring and driving the guidance client
//!
//! Nothing the positioning service sends, and no transport failure, is an
//! error here: those are absorbed by the reconnect loop. These errors only
//! cover setup mistakes and talking to a client that has already stopped.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Endpoint is not a `ws://` or `wss://` address with a host
    #[error("Invalid endpoint {0:?}: expected ws:// or wss:// address")]
    InvalidEndpoint(String),

    #[error("{0} must be greater than zero")]
    InvalidDuration(&'static str),

    #[error("Backoff maximum ({max_ms}ms) is below its base ({base_ms}ms)")]
    BackoffRange { base_ms: u64, max_ms: u64 },

    #[error("Invalid {key} value {value:?}")]
    Unparsable { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Background runtime could not be created
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// Command sent after dispose() or after the background loop exited
    #[error("Guidance client already disposed")]
    Disposed,
}
