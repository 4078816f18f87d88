//! The `client` module defines the reliable messaging client.
//!
//! It provides the `Client` orchestrator, which owns the message buffer, the
//! topic registry and the current transport, together with the events it
//! emits and the subscriber types used for broadcasts.

pub mod engine;
pub mod events;
pub mod subscribers;

pub use engine::{Client, TransportInfo};
pub use events::{ClientEvent, ConnectionState, LostResponse};
pub use subscribers::{Broadcast, Subscriber, SubscriberError, SubscriptionId};
