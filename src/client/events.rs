//! Client events and state types.

use std::fmt;

use serde_json::Value;

use crate::buffer::message::Message;
use crate::transport::frame::Handshake;
use crate::transport::socket::Datum;

/// Observable connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    Open,
    /// Connected and handshake completed.
    Ready,
    Closed,
    /// Waiting on a freshly created transport.
    Reconnecting,
    /// The transport created by a reconnect closed again.
    ReconnectingFailed,
    Disposed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Open => "open",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ReconnectingFailed => "reconnecting_failed",
            ConnectionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Reply data that arrived for an id the client does not know.
#[derive(Debug, Clone, PartialEq)]
pub enum LostResponse {
    Payload(Value),
    Attachment(Vec<u8>),
}

/// Events produced by a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged {
        new: ConnectionState,
        old: ConnectionState,
    },
    /// Underlying connection opened.
    Open,
    Closed {
        reason: Option<String>,
    },
    /// Connection-level error.
    Error(String),
    /// Every inbound datum, before classification.
    RawMessage(Datum),
    BinaryMessage(Vec<u8>),
    BinaryAttachment {
        id: String,
        attachment: Vec<u8>,
    },
    Handshake(Handshake),
    Acknowledged {
        id: String,
        message: Message,
    },
    /// Acknowledgement for a message not in the buffer.
    LostAcknowledgement {
        id: String,
    },
    MessageResponse {
        message: Message,
        payload: Value,
    },
    /// Response for a message not in the buffer, or for a notification.
    LostMessageResponse {
        id: String,
        response: LostResponse,
    },
    MessageErrorResponse {
        id: String,
        message: Option<Message>,
        payload: Value,
    },
    /// An in-flight message lost its transport and will be sent again.
    MessageRescheduled(Message),
    ServerError(Value),
    /// Inbound text that does not carry the protocol prefix.
    ForeignProtocol(String),
    UnknownMessageType {
        code: String,
        body: String,
    },
    IdentChanged {
        new: Option<Value>,
        old: Option<Value>,
    },
    PlatformChanged {
        new: Option<Value>,
        old: Option<Value>,
    },
    /// Broadcast for a topic without subscribers.
    LostBroadcast {
        topic: String,
        payload: Value,
    },
}
