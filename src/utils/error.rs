//! The `error` module defines the error type shared across `tickwire`.
//!
//! Only programming-usage errors and infrastructure failures are errors here.
//! Protocol desynchronization (lost acknowledgements, foreign frames, etc.) is
//! reported through client events and never through this type.

use thiserror::Error;

/// Errors returned synchronously by client, message and transport operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Message {id} is already scheduled to be sent")]
    AlreadyScheduled { id: String },

    #[error("Binary payloads are not supported; encode as text or use the socket directly")]
    UnsupportedPayloadType,

    #[error("Transport is not ready")]
    TransportNotReady,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("No tokio runtime available to drive timers")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
