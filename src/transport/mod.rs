//! The `transport` module is responsible for the wire: the envelope codec,
//! the raw connection capability, its WebSocket implementation and the
//! handshake-aware socket transport the client drives.

pub mod connection;
pub mod frame;
pub mod socket;
pub mod websocket;

pub use connection::{Connection, Connector, EventSink, SocketEvent};
pub use frame::{ClientFrame, Decoded, FrameType, Handshake, Payload, ServerFrame};
pub use socket::{Datum, LinkState, SocketTransport, TransportEvent};
pub use websocket::WsConnector;
