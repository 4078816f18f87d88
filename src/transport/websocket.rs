//! WebSocket connector
//!
//! Opens client connections with `tokio-tungstenite`. Each connection attempt
//! runs in its own task:
//! - the receive loop turns WebSocket frames into [`SocketEvent`]s
//! - outbound datums are queued on an unbounded channel and written by a
//!   dedicated send loop, so `Connection::send` never blocks the caller
//!
//! The handshake and everything above it belong to the transport; this module
//! only moves datums.

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::connection::{Connection, Connector, EventSink, SocketEvent};
use crate::utils::error::{Error, Result};

pub struct WsConnector {
    runtime: Handle,
}

impl WsConnector {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self { runtime })
    }
}

pub struct WsConnection {
    sender: UnboundedSender<WsMessage>,
}

impl Connection for WsConnection {
    fn send(&self, text: String) -> Result<()> {
        self.sender
            .send(WsMessage::text(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        // the send loop may already be gone; nothing left to close then
        let _ = self.sender.send(WsMessage::Close(None));
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Connection> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let url = url.to_string();

        self.runtime.spawn(async move {
            let ws_stream = match connect_async(url.as_str()).await {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    warn!("WebSocket connect to {url} failed: {e}");
                    sink(SocketEvent::Error(e.to_string()));
                    sink(SocketEvent::Closed(None));
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let send_loop = tokio::spawn({
                let url = url.clone();
                async move {
                    while let Some(msg) = rx.recv().await {
                        let closing = msg.is_close();
                        if let Err(e) = ws_sender.send(msg).await {
                            warn!("Failed to send datum to {url}: {e}");
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    debug!("Send loop closed for {url}");
                }
            });

            sink(SocketEvent::Open);

            let mut reason = None;
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => sink(SocketEvent::Text(text.as_str().to_owned())),
                    Ok(WsMessage::Binary(data)) => sink(SocketEvent::Binary(data.to_vec())),
                    Ok(WsMessage::Close(frame)) => {
                        reason = frame.map(|f| f.reason.as_str().to_owned());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        sink(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            send_loop.abort();
            debug!("{url} disconnected");
            sink(SocketEvent::Closed(reason));
        });

        Box::new(WsConnection { sender: tx })
    }
}
