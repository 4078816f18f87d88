//! # Tickwire
//!
//! `tickwire` is a reliable messaging client layered over a raw socket
//! connection. It offers request/response messaging with per-message
//! timeouts, fire-and-forget notifications, delivery acknowledgement
//! tracking, topic broadcasts, automatic reconnection and re-delivery of
//! in-flight messages after a reconnect.
//!
//! ## Core Modules
//!
//! - `transport`: The envelope codec, the connection capability and its WebSocket implementation.
//! - `buffer`: Messages and the buffer that holds them until they are finalized.
//! - `client`: The orchestrator driving the buffer through its periodic tick.
//! - `config`: Handles loading and managing client configuration.
//! - `utils`: Shared utilities such as errors, logging, listeners and clocks.

pub mod buffer;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{Message, Outcome, Response};
pub use client::{Broadcast, Client, ClientEvent, ConnectionState, Subscriber, SubscriberError};
pub use config::ClientConfig;
pub use transport::Payload;
pub use utils::error::{Error, Result};
