//! The raw connection capability the transport is layered over.
//!
//! A [`Connector`] opens one connection attempt per call and reports its
//! lifecycle through an [`EventSink`]. Implementations must deliver events
//! asynchronously and never invoke the sink from inside `open`.

use std::sync::Arc;

use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Closed(Option<String>),
    Error(String),
}

pub type EventSink = Arc<dyn Fn(SocketEvent) + Send + Sync>;

pub trait Connection: Send {
    /// Queue a text datum for transmission.
    fn send(&self, text: String) -> Result<()>;

    /// Begin closing. A `Closed` event follows once the peer is gone.
    fn close(&self);
}

pub trait Connector: Send + Sync {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Connection>;
}
