//! Socket transport
//!
//! One `SocketTransport` owns exactly one connection attempt. It performs the
//! protocol handshake, classifies every inbound datum into a typed
//! [`TransportEvent`] and tracks readiness (connection open and handshake
//! reply received). A transport is never reused: the client replaces it
//! wholesale after a disconnect, so readiness always starts out false.

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::transport::connection::{Connection, Connector, EventSink, SocketEvent};
use crate::transport::frame::{self, ClientFrame, Decoded, Handshake, ServerFrame};
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Raw inbound datum, reported before any classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Closed { reason: Option<String> },
    Error(String),
    Message(Datum),
    BinaryMessage(Vec<u8>),
    BinaryAttachment { id: String, attachment: Vec<u8> },
    Handshake(Handshake),
    Acknowledged { id: String },
    MessageResponse { id: String, payload: Value },
    IdentChange(Value),
    PlatformChange(Value),
    Broadcast { topic: String, payload: Value },
    ServerError(Value),
    MessageError { id: String, payload: Value },
    ForeignProtocol(String),
    UnknownMessageType { code: String, body: String },
}

pub struct SocketTransport {
    id: String,
    connection: Box<dyn Connection>,
    link: LinkState,
    handshake: Option<Handshake>,
}

impl SocketTransport {
    /// Open a new connection attempt. Socket events for this transport must be
    /// routed back into [`SocketTransport::handle`].
    pub fn open(id: String, connector: &dyn Connector, url: &str, sink: EventSink) -> Self {
        debug!("Opening transport {id} to {url}");
        Self {
            connection: connector.open(url, sink),
            id,
            link: LinkState::Connecting,
            handshake: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.link == LinkState::Open && self.handshake.is_some()
    }

    /// Serialize and transmit an outbound frame.
    pub fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::TransportNotReady);
        }
        self.connection.send(frame.encode()?)?;
        trace!("Sent frame {frame:?} on transport {}", self.id);
        Ok(())
    }

    /// Replace the server's view of our subscriptions. No-op while not ready.
    pub fn synchronize_topics(&self, topics: &[String]) -> Result<()> {
        if !self.is_ready() {
            return Ok(());
        }
        let frame = ClientFrame::SynchronizeTopics {
            topics: topics.to_vec(),
        };
        self.connection.send(frame.encode()?)
    }

    pub fn close(&self) {
        self.connection.close();
    }

    /// Apply a socket event and classify it into transport events.
    pub fn handle(&mut self, event: SocketEvent) -> Vec<TransportEvent> {
        if self.link == LinkState::Closed {
            trace!("Transport {} ignoring {event:?} after close", self.id);
            return Vec::new();
        }

        match event {
            SocketEvent::Open => {
                self.link = LinkState::Open;
                let handshake = ClientFrame::handshake()
                    .encode()
                    .and_then(|text| self.connection.send(text));
                if let Err(e) = handshake {
                    warn!("Transport {} failed to send handshake: {e}", self.id);
                }
                vec![TransportEvent::Open]
            }
            SocketEvent::Closed(reason) => {
                self.link = LinkState::Closed;
                vec![TransportEvent::Closed { reason }]
            }
            SocketEvent::Error(error) => vec![TransportEvent::Error(error)],
            SocketEvent::Binary(data) => {
                let mut events = vec![
                    TransportEvent::Message(Datum::Binary(data.clone())),
                    TransportEvent::BinaryMessage(data.clone()),
                ];
                // not every binary datum is an attachment
                if let Some((id, attachment)) = frame::decode_attachment(&data) {
                    events.push(TransportEvent::BinaryAttachment { id, attachment });
                }
                events
            }
            SocketEvent::Text(text) => {
                let mut events = vec![TransportEvent::Message(Datum::Text(text.clone()))];
                events.push(self.classify(text));
                events
            }
        }
    }

    fn classify(&mut self, text: String) -> TransportEvent {
        let decoded = match frame::decode(&text) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Transport {} received undecodable frame: {e}", self.id);
                return TransportEvent::Error(e.to_string());
            }
        };

        match decoded {
            Decoded::ForeignProtocol => TransportEvent::ForeignProtocol(text),
            Decoded::UnknownType { code, body } => {
                TransportEvent::UnknownMessageType { code, body }
            }
            Decoded::Frame(ServerFrame::Handshake(handshake)) => {
                self.handshake = Some(handshake.clone());
                TransportEvent::Handshake(handshake)
            }
            Decoded::Frame(ServerFrame::Ack { id }) => TransportEvent::Acknowledged { id },
            Decoded::Frame(ServerFrame::Message { id, payload }) => {
                TransportEvent::MessageResponse { id, payload }
            }
            Decoded::Frame(ServerFrame::IdentChange { ident }) => TransportEvent::IdentChange(ident),
            Decoded::Frame(ServerFrame::PlatformChange { platform }) => {
                TransportEvent::PlatformChange(platform)
            }
            Decoded::Frame(ServerFrame::Broadcast { topic, payload }) => {
                TransportEvent::Broadcast { topic, payload }
            }
            Decoded::Frame(ServerFrame::Error(payload)) => TransportEvent::ServerError(payload),
            Decoded::Frame(ServerFrame::MessageError { id, payload }) => {
                TransportEvent::MessageError { id, payload }
            }
        }
    }
}
