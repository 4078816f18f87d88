//! Envelope codec.
//!
//! Every text frame is `<magic><type><json body>`: the three ASCII digits
//! `463`, a two digit frame type code, then a JSON document. Binary
//! attachments travel as raw datums: a five byte ASCII header (`46321`), the
//! 36 byte ASCII message id, then the attachment bytes with no further framing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::error::{Error, Result};

pub const MAGIC: &str = "463";
pub const PROTOCOL_VERSION: u32 = 1;

const HEADER_LEN: usize = 5;
const ATTACHMENT_ID_LEN: usize = 36;
const ATTACHMENT_HEADER_LEN: usize = HEADER_LEN + ATTACHMENT_ID_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    ClientHandshake = 10,
    ServerHandshake = 11,
    ClientMessage = 12,
    ServerAck = 13,
    ServerMessage = 14,
    ServerIdentChange = 15,
    ServerPlatformChange = 16,
    ServerBroadcast = 17,
    ServerError = 18,
    ServerMessageError = 19,
    ClientSynchronizeTopics = 20,
    ServerBinaryAttachment = 21,
}

impl FrameType {
    const ALL: [FrameType; 12] = [
        FrameType::ClientHandshake,
        FrameType::ServerHandshake,
        FrameType::ClientMessage,
        FrameType::ServerAck,
        FrameType::ServerMessage,
        FrameType::ServerIdentChange,
        FrameType::ServerPlatformChange,
        FrameType::ServerBroadcast,
        FrameType::ServerError,
        FrameType::ServerMessageError,
        FrameType::ClientSynchronizeTopics,
        FrameType::ServerBinaryAttachment,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code: u8 = code.parse().ok()?;
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Magic prefix followed by the type code, e.g. `46312`.
    pub fn header(self) -> String {
        format!("{MAGIC}{:02}", self.code())
    }
}

/// A payload handed to `send`/`notify`. Only JSON payloads can be framed.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Json(Value::String(value.to_string()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Json(Value::String(value))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Binary(value.to_vec())
    }
}

impl Payload {
    /// The JSON value, or `UnsupportedPayloadType` for raw binary.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Payload::Json(value) => Ok(value),
            Payload::Binary(_) => Err(Error::UnsupportedPayloadType),
        }
    }
}

/// Server-asserted connection metadata from the handshake reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub platform: Option<Value>,
    #[serde(default)]
    pub ident: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Handshake {
        protocol: u32,
    },
    Message {
        id: String,
        topic: String,
        payload: Value,
        notify: bool,
    },
    SynchronizeTopics {
        topics: Vec<String>,
    },
}

/// Frames sent by the server, excluding binary attachments.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Handshake(Handshake),
    Ack { id: String },
    Message { id: String, payload: Value },
    IdentChange { ident: Value },
    PlatformChange { platform: Value },
    Broadcast { topic: String, payload: Value },
    Error(Value),
    MessageError { id: String, payload: Value },
}

/// Classification of an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(ServerFrame),
    /// Not our protocol; other protocols may share the channel.
    ForeignProtocol,
    /// Our magic prefix, but a type code we do not handle.
    UnknownType { code: String, body: String },
}

#[derive(Serialize, Deserialize)]
struct HandshakeBody {
    protocol: u32,
}

#[derive(Serialize, Deserialize)]
struct MessageBody {
    id: String,
    topic: String,
    payload: Value,
    notify: bool,
}

#[derive(Serialize, Deserialize)]
struct TopicsBody {
    topics: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct AckBody {
    ack: String,
}

#[derive(Serialize, Deserialize)]
struct ReplyBody {
    id: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentBody {
    ident_change: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformBody {
    platform_change: Value,
}

#[derive(Serialize, Deserialize)]
struct BroadcastBody {
    topic: String,
    #[serde(default)]
    broadcast: Value,
}

#[derive(Deserialize)]
struct MessageErrorId {
    id: String,
}

impl ClientFrame {
    /// Build a message frame, rejecting binary payloads.
    pub fn message(
        id: impl Into<String>,
        topic: impl Into<String>,
        payload: Payload,
        notify: bool,
    ) -> Result<Self> {
        Ok(ClientFrame::Message {
            id: id.into(),
            topic: topic.into(),
            payload: payload.into_json()?,
            notify,
        })
    }

    pub fn handshake() -> Self {
        ClientFrame::Handshake {
            protocol: PROTOCOL_VERSION,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientFrame::Handshake { .. } => FrameType::ClientHandshake,
            ClientFrame::Message { .. } => FrameType::ClientMessage,
            ClientFrame::SynchronizeTopics { .. } => FrameType::ClientSynchronizeTopics,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let body = match self {
            ClientFrame::Handshake { protocol } => serde_json::to_string(&HandshakeBody {
                protocol: *protocol,
            })?,
            ClientFrame::Message {
                id,
                topic,
                payload,
                notify,
            } => serde_json::to_string(&MessageBody {
                id: id.clone(),
                topic: topic.clone(),
                payload: payload.clone(),
                notify: *notify,
            })?,
            ClientFrame::SynchronizeTopics { topics } => serde_json::to_string(&TopicsBody {
                topics: topics.clone(),
            })?,
        };
        Ok(format!("{}{}", self.frame_type().header(), body))
    }

    /// Decode a client frame; used by peers and tests inspecting the wire.
    pub fn decode(text: &str) -> Result<Self> {
        let (code, body) = split_header(text)
            .ok_or_else(|| Error::MalformedFrame(format!("not a client frame: {text}")))?;
        match FrameType::from_code(code) {
            Some(FrameType::ClientHandshake) => {
                let body: HandshakeBody = parse_body(body)?;
                Ok(ClientFrame::Handshake {
                    protocol: body.protocol,
                })
            }
            Some(FrameType::ClientMessage) => {
                let body: MessageBody = parse_body(body)?;
                Ok(ClientFrame::Message {
                    id: body.id,
                    topic: body.topic,
                    payload: body.payload,
                    notify: body.notify,
                })
            }
            Some(FrameType::ClientSynchronizeTopics) => {
                let body: TopicsBody = parse_body(body)?;
                Ok(ClientFrame::SynchronizeTopics {
                    topics: body.topics,
                })
            }
            _ => Err(Error::MalformedFrame(format!(
                "unexpected client frame type in {text}"
            ))),
        }
    }
}

impl ServerFrame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            ServerFrame::Handshake(_) => FrameType::ServerHandshake,
            ServerFrame::Ack { .. } => FrameType::ServerAck,
            ServerFrame::Message { .. } => FrameType::ServerMessage,
            ServerFrame::IdentChange { .. } => FrameType::ServerIdentChange,
            ServerFrame::PlatformChange { .. } => FrameType::ServerPlatformChange,
            ServerFrame::Broadcast { .. } => FrameType::ServerBroadcast,
            ServerFrame::Error(_) => FrameType::ServerError,
            ServerFrame::MessageError { .. } => FrameType::ServerMessageError,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let body = match self {
            ServerFrame::Handshake(handshake) => serde_json::to_string(handshake)?,
            ServerFrame::Ack { id } => serde_json::to_string(&AckBody { ack: id.clone() })?,
            ServerFrame::Message { id, payload } => serde_json::to_string(&ReplyBody {
                id: id.clone(),
                payload: payload.clone(),
            })?,
            ServerFrame::IdentChange { ident } => serde_json::to_string(&IdentBody {
                ident_change: ident.clone(),
            })?,
            ServerFrame::PlatformChange { platform } => serde_json::to_string(&PlatformBody {
                platform_change: platform.clone(),
            })?,
            ServerFrame::Broadcast { topic, payload } => serde_json::to_string(&BroadcastBody {
                topic: topic.clone(),
                broadcast: payload.clone(),
            })?,
            ServerFrame::Error(payload) => serde_json::to_string(payload)?,
            ServerFrame::MessageError { id, payload } => {
                let mut body = match payload {
                    Value::Object(map) => map.clone(),
                    other => {
                        let mut map = Map::new();
                        map.insert("error".to_string(), other.clone());
                        map
                    }
                };
                body.insert("id".to_string(), Value::String(id.clone()));
                serde_json::to_string(&Value::Object(body))?
            }
        };
        Ok(format!("{}{}", self.frame_type().header(), body))
    }
}

/// Classify an inbound text frame.
pub fn decode(text: &str) -> Result<Decoded> {
    let Some((code, body)) = split_header(text) else {
        return Ok(Decoded::ForeignProtocol);
    };

    let frame = match FrameType::from_code(code) {
        Some(FrameType::ServerHandshake) => ServerFrame::Handshake(parse_body(body)?),
        Some(FrameType::ServerAck) => {
            let body: AckBody = parse_body(body)?;
            ServerFrame::Ack { id: body.ack }
        }
        Some(FrameType::ServerMessage) => {
            let body: ReplyBody = parse_body(body)?;
            ServerFrame::Message {
                id: body.id,
                payload: body.payload,
            }
        }
        Some(FrameType::ServerIdentChange) => {
            let body: IdentBody = parse_body(body)?;
            ServerFrame::IdentChange {
                ident: body.ident_change,
            }
        }
        Some(FrameType::ServerPlatformChange) => {
            let body: PlatformBody = parse_body(body)?;
            ServerFrame::PlatformChange {
                platform: body.platform_change,
            }
        }
        Some(FrameType::ServerBroadcast) => {
            let body: BroadcastBody = parse_body(body)?;
            ServerFrame::Broadcast {
                topic: body.topic,
                payload: body.broadcast,
            }
        }
        Some(FrameType::ServerError) => ServerFrame::Error(parse_body(body)?),
        Some(FrameType::ServerMessageError) => {
            // the whole body is the error payload; only the id is extracted
            let payload: Value = parse_body(body)?;
            let MessageErrorId { id } = serde_json::from_value(payload.clone())
                .map_err(|e| Error::MalformedFrame(e.to_string()))?;
            ServerFrame::MessageError { id, payload }
        }
        _ => {
            return Ok(Decoded::UnknownType {
                code: code.to_string(),
                body: body.to_string(),
            });
        }
    };

    Ok(Decoded::Frame(frame))
}

/// Encode a binary attachment datum for message `id`.
pub fn encode_attachment(id: &str, attachment: &[u8]) -> Result<Vec<u8>> {
    if id.len() != ATTACHMENT_ID_LEN || !id.is_ascii() {
        return Err(Error::MalformedFrame(format!(
            "attachment id must be {ATTACHMENT_ID_LEN} ASCII characters: {id}"
        )));
    }
    let mut datum = Vec::with_capacity(ATTACHMENT_HEADER_LEN + attachment.len());
    datum.extend_from_slice(FrameType::ServerBinaryAttachment.header().as_bytes());
    datum.extend_from_slice(id.as_bytes());
    datum.extend_from_slice(attachment);
    Ok(datum)
}

/// Parse a binary datum as an attachment. `None` when the header does not match.
pub fn decode_attachment(datum: &[u8]) -> Option<(String, Vec<u8>)> {
    if datum.len() < ATTACHMENT_HEADER_LEN {
        return None;
    }
    let header = std::str::from_utf8(&datum[..HEADER_LEN]).ok()?;
    if header != FrameType::ServerBinaryAttachment.header() {
        return None;
    }
    let id = std::str::from_utf8(&datum[HEADER_LEN..ATTACHMENT_HEADER_LEN]).ok()?;
    Some((id.to_string(), datum[ATTACHMENT_HEADER_LEN..].to_vec()))
}

/// Split into (type code, body). `None` for frames without our magic prefix.
///
/// A code that ends inside a multibyte character is widened to the next char
/// boundary; it never parses as a known type.
fn split_header(text: &str) -> Option<(&str, &str)> {
    if !text.as_bytes().starts_with(MAGIC.as_bytes()) || text.len() < HEADER_LEN {
        return None;
    }
    let split = (HEADER_LEN..=text.len()).find(|&i| text.is_char_boundary(i))?;
    Some((&text[MAGIC.len()..split], &text[split..]))
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::MalformedFrame(e.to_string()))
}
