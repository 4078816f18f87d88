//! Client orchestrator
//!
//! The [`Client`] owns the message buffer, the topic registry and the current
//! transport. Two sources drive it: the periodic tick, which reconciles the
//! buffer against the transport, and socket events, which resolve messages and
//! move the connection state. Both run under one lock so that each observes a
//! consistent buffer. Listener invocations are queued while the lock is held
//! and run once it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::buffer::message::Message;
use crate::buffer::queue::MessageBuffer;
use crate::client::events::{ClientEvent, ConnectionState, LostResponse};
use crate::client::subscribers::{Broadcast, Subscriber, SubscriberRegistry, SubscriptionId};
use crate::config::ClientConfig;
use crate::transport::connection::{Connector, EventSink, SocketEvent};
use crate::transport::frame::Handshake;
use crate::transport::socket::{SocketTransport, TransportEvent};
use crate::transport::websocket::WsConnector;
use crate::utils::clock::{Clock, TimerId, TokioClock};
use crate::utils::error::Result;
use crate::utils::listeners::{Effect, ListenerId, Listeners, dispatch, report};

const MAX_RECOMMENDED_TICK: Duration = Duration::from_millis(100);

type StateFn = dyn Fn(ConnectionState, ConnectionState) + Send + Sync;
type LostResponseFn = dyn Fn(&str, &LostResponse) + Send + Sync;
type LostAcknowledgedFn = dyn Fn(&str) + Send + Sync;
type RescheduledFn = dyn Fn(&Message) + Send + Sync;
type EventFn = dyn Fn(&ClientEvent) + Send + Sync;

/// Snapshot of the current transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportInfo {
    pub id: String,
    pub ready: bool,
    pub handshake: Option<Handshake>,
}

#[derive(Default)]
struct ClientListeners {
    state: Listeners<StateFn>,
    lost_response: Listeners<LostResponseFn>,
    lost_acknowledged: Listeners<LostAcknowledgedFn>,
    rescheduled: Listeners<RescheduledFn>,
    events: Listeners<EventFn>,
}

struct ClientInner {
    state: ConnectionState,
    buffer: MessageBuffer,
    subscribers: SubscriberRegistry,
    transport: Option<SocketTransport>,
    ident: Option<Value>,
    platform: Option<Value>,
    tick_timer: Option<TimerId>,
    reconnect_timer: Option<TimerId>,
    listeners: ClientListeners,
    effects: Vec<Effect>,
}

impl ClientInner {
    fn is_disposed(&self) -> bool {
        self.state == ConnectionState::Disposed
    }

    fn defer(&mut self, effect: Option<Effect>) {
        if let Some(effect) = effect {
            self.effects.push(effect);
        }
    }

    fn emit(&mut self, event: ClientEvent) {
        let listeners = self.listeners.events.snapshot();
        if listeners.is_empty() {
            return;
        }
        self.effects.push(Box::new(move || {
            let failures = dispatch(&listeners, |l| l(&event));
            report("client event", &failures);
        }));
    }

    fn set_state(&mut self, new: ConnectionState) {
        if self.state == new {
            return;
        }
        let old = self.state;
        self.state = new;
        info!("Client state changed from {old} to {new}");

        let listeners = self.listeners.state.snapshot();
        self.effects.push(Box::new(move || {
            let failures = dispatch(&listeners, |l| l(new, old));
            report("state change", &failures);
        }));
        self.emit(ClientEvent::StateChanged { new, old });
    }

    fn lost_response(&mut self, id: String, response: LostResponse) {
        debug!("Received response for unknown message {id}");
        let listeners = self.listeners.lost_response.snapshot();
        let event = ClientEvent::LostMessageResponse {
            id: id.clone(),
            response: response.clone(),
        };
        self.effects.push(Box::new(move || {
            let failures = dispatch(&listeners, |l| l(&id, &response));
            report("lost message response", &failures);
        }));
        self.emit(event);
    }

    fn lost_acknowledgement(&mut self, id: String) {
        debug!("Received acknowledgement for unknown message {id}");
        let listeners = self.listeners.lost_acknowledged.snapshot();
        let event = ClientEvent::LostAcknowledgement { id: id.clone() };
        self.effects.push(Box::new(move || {
            let failures = dispatch(&listeners, |l| l(&id));
            report("lost acknowledgement", &failures);
        }));
        self.emit(event);
    }

    fn rescheduled(&mut self, message: Message) {
        let listeners = self.listeners.rescheduled.snapshot();
        let event = ClientEvent::MessageRescheduled(message.clone());
        self.effects.push(Box::new(move || {
            let failures = dispatch(&listeners, |l| l(&message));
            report("message rescheduled", &failures);
        }));
        self.emit(event);
    }

    fn change_ident(&mut self, ident: Option<Value>) {
        if ident == self.ident {
            return;
        }
        let old = std::mem::replace(&mut self.ident, ident.clone());
        self.emit(ClientEvent::IdentChanged { new: ident, old });
    }

    fn change_platform(&mut self, platform: Option<Value>) {
        if platform == self.platform {
            return;
        }
        let old = std::mem::replace(&mut self.platform, platform.clone());
        self.emit(ClientEvent::PlatformChanged { new: platform, old });
    }

    fn synchronize_topics(&self) {
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.synchronize_topics(&self.subscribers.known_topics()) {
                warn!("Failed to synchronize topics: {e}");
            }
        }
    }

    fn broadcast(&mut self, topic: String, payload: Value) {
        let subscribers = self.subscribers.for_topic(&topic);
        if subscribers.is_empty() {
            self.emit(ClientEvent::LostBroadcast { topic, payload });
            return;
        }

        let broadcast = Broadcast { topic, payload };
        self.effects.push(Box::new(move || {
            let mut errors = Vec::new();
            let mut failures = dispatch(&subscribers, |subscriber| {
                if let Err(e) = subscriber(&broadcast) {
                    errors.push(e.to_string());
                }
            });
            failures.extend(errors);
            report(&broadcast.topic, &failures);
        }));
    }
}

struct Shared {
    id: String,
    url: String,
    tick_interval: Duration,
    reconnect_interval: Duration,
    clock: Arc<dyn Clock>,
    connector: Arc<dyn Connector>,
    this: Weak<Shared>,
    inner: Mutex<ClientInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClientInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the lock, then run the effects it queued.
    fn with_inner<R>(&self, f: impl FnOnce(&mut ClientInner) -> R) -> R {
        let (result, effects) = {
            let mut inner = self.lock();
            let result = f(&mut inner);
            (result, std::mem::take(&mut inner.effects))
        };
        for effect in effects {
            effect();
        }
        result
    }

    fn open_transport(&self, inner: &mut ClientInner) {
        let id = Uuid::new_v4().to_string();
        let sink = self.sink_for(id.clone());
        inner.transport = Some(SocketTransport::open(
            id,
            self.connector.as_ref(),
            &self.url,
            sink,
        ));
    }

    fn sink_for(&self, transport_id: String) -> EventSink {
        let shared = self.this.clone();
        Arc::new(move |event: SocketEvent| {
            if let Some(shared) = shared.upgrade() {
                shared.on_socket_event(&transport_id, event);
            }
        })
    }

    fn start_ticking(&self, inner: &mut ClientInner) {
        if self.tick_interval > MAX_RECOMMENDED_TICK {
            warn!(
                "Tick interval larger than {}ms is not recommended; current value is {}ms",
                MAX_RECOMMENDED_TICK.as_millis(),
                self.tick_interval.as_millis()
            );
        }

        let shared = self.this.clone();
        inner.tick_timer = Some(self.clock.set_interval(
            self.tick_interval,
            Arc::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.tick();
                }
            }),
        ));
    }

    fn tick(&self) {
        self.with_inner(|inner| {
            if inner.is_disposed() {
                return;
            }
            let now = self.clock.now();

            inner.buffer.remove_cancelled();
            inner.buffer.remove_acknowledged_notifications();

            for message in inner.buffer.timed_out(now) {
                let effect = message.complete_timed_out();
                inner.defer(effect);
            }
            for message in inner.buffer.ack_timed_out(now) {
                let effect = message.complete_ack_timed_out();
                inner.defer(effect);
            }

            let current = inner
                .transport
                .as_ref()
                .filter(|t| t.is_ready())
                .map(|t| t.id().to_string());

            match current {
                None => {
                    inner.buffer.remove_offline_unsent();
                }
                Some(transport_id) => {
                    for message in inner.buffer.lost_transport(&transport_id) {
                        debug!("Rescheduling message {} for re-delivery", message.id());
                        message.reschedule();
                        inner.rescheduled(message);
                    }
                    self.send_unsent(inner, &transport_id, now);
                }
            }

            inner.buffer.remove_finalized();
        });
    }

    fn send_unsent(&self, inner: &mut ClientInner, transport_id: &str, now: u64) {
        let Some(transport) = inner.transport.as_ref() else {
            return;
        };

        for message in inner.buffer.unsent() {
            let Some(frame) = message.frame() else {
                continue;
            };
            match transport.send_frame(&frame) {
                Ok(()) => {
                    debug!("Sent message {} on transport {transport_id}", message.id());
                    message.mark_sent(transport_id, now);
                }
                Err(e) => warn!("Failed to send message {}: {e}", message.id()),
            }
        }
    }

    fn reconnect(&self) {
        self.with_inner(|inner| {
            if inner.is_disposed() {
                return;
            }
            inner.reconnect_timer = None;
            inner.set_state(ConnectionState::Reconnecting);
            self.open_transport(inner);
        });
    }

    fn on_socket_event(&self, transport_id: &str, event: SocketEvent) {
        self.with_inner(|inner| {
            if inner.is_disposed() {
                return;
            }

            let Some(transport) = inner.transport.as_mut() else {
                return;
            };
            if transport.id() != transport_id {
                trace!("Ignoring {event:?} from replaced transport {transport_id}");
                return;
            }

            for event in transport.handle(event) {
                self.on_transport_event(inner, event);
            }
        });
    }

    fn on_transport_event(&self, inner: &mut ClientInner, event: TransportEvent) {
        let now = self.clock.now();

        match event {
            TransportEvent::Open => {
                if inner.state != ConnectionState::Reconnecting {
                    inner.set_state(ConnectionState::Open);
                }
                inner.emit(ClientEvent::Open);
            }
            TransportEvent::Closed { reason } => {
                if inner.state == ConnectionState::Reconnecting {
                    inner.set_state(ConnectionState::ReconnectingFailed);
                } else {
                    inner.set_state(ConnectionState::Closed);
                }
                self.schedule_reconnect(inner);
                inner.emit(ClientEvent::Closed { reason });
            }
            TransportEvent::Error(error) => {
                debug!("Transport error: {error}");
                inner.emit(ClientEvent::Error(error));
            }
            TransportEvent::Message(datum) => inner.emit(ClientEvent::RawMessage(datum)),
            TransportEvent::BinaryMessage(data) => inner.emit(ClientEvent::BinaryMessage(data)),
            TransportEvent::BinaryAttachment { id, attachment } => {
                match inner.buffer.get(&id).filter(|m| !m.is_notification()) {
                    None => inner.lost_response(id, LostResponse::Attachment(attachment)),
                    Some(message) => {
                        let effect = message.set_response_attachment(attachment.clone(), now);
                        inner.defer(effect);
                        inner.emit(ClientEvent::BinaryAttachment { id, attachment });
                    }
                }
            }
            TransportEvent::Handshake(handshake) => {
                inner.set_state(ConnectionState::Ready);
                inner.change_platform(handshake.platform.clone());
                inner.change_ident(handshake.ident.clone());
                inner.synchronize_topics();
                inner.emit(ClientEvent::Handshake(handshake));
            }
            TransportEvent::Acknowledged { id } => match inner.buffer.get(&id) {
                None => inner.lost_acknowledgement(id),
                Some(message) => {
                    let effect = message.acknowledge(now);
                    inner.defer(effect);
                    inner.emit(ClientEvent::Acknowledged { id, message });
                }
            },
            TransportEvent::MessageResponse { id, payload } => {
                match inner.buffer.get(&id).filter(|m| !m.is_notification()) {
                    None => inner.lost_response(id, LostResponse::Payload(payload)),
                    Some(message) => {
                        let effect = message.set_response_payload(payload.clone(), now);
                        inner.defer(effect);
                        inner.emit(ClientEvent::MessageResponse { message, payload });
                    }
                }
            }
            TransportEvent::IdentChange(ident) => inner.change_ident(Some(ident)),
            TransportEvent::PlatformChange(platform) => inner.change_platform(Some(platform)),
            TransportEvent::Broadcast { topic, payload } => inner.broadcast(topic, payload),
            TransportEvent::ServerError(payload) => {
                warn!("Server reported an error: {payload}");
                inner.emit(ClientEvent::ServerError(payload));
            }
            TransportEvent::MessageError { id, payload } => {
                let message = inner.buffer.get(&id);
                if let Some(message) = &message {
                    let effect = message.complete_failed(payload.clone());
                    inner.defer(effect);
                }
                inner.emit(ClientEvent::MessageErrorResponse {
                    id,
                    message,
                    payload,
                });
            }
            TransportEvent::ForeignProtocol(text) => inner.emit(ClientEvent::ForeignProtocol(text)),
            TransportEvent::UnknownMessageType { code, body } => {
                inner.emit(ClientEvent::UnknownMessageType { code, body })
            }
        }
    }

    fn schedule_reconnect(&self, inner: &mut ClientInner) {
        if let Some(pending) = inner.reconnect_timer.take() {
            self.clock.cancel(pending);
        }

        let shared = self.this.clone();
        inner.reconnect_timer = Some(self.clock.set_timeout(
            self.reconnect_interval,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.reconnect();
                }
            }),
        ));
    }

    fn shutdown(&self, inner: &mut ClientInner) {
        if let Some(timer) = inner.tick_timer.take() {
            self.clock.cancel(timer);
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            self.clock.cancel(timer);
        }
        if let Some(transport) = &inner.transport {
            transport.close();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state == ConnectionState::Disposed {
            return;
        }
        if let Some(timer) = inner.tick_timer.take() {
            self.clock.cancel(timer);
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            self.clock.cancel(timer);
        }
        if let Some(transport) = &inner.transport {
            transport.close();
        }
    }
}

/// Reliable messaging client over a socket connection.
///
/// Cloning a `Client` yields another handle to the same client. The client
/// connects on construction and reconnects on its own until disposed.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client on the ambient tokio runtime, connecting over WebSocket.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let clock = Arc::new(TokioClock::new()?);
        let connector = Arc::new(WsConnector::new()?);
        Ok(Self::with_runtime(config, clock, connector))
    }

    /// Create a client with an explicit clock and connection factory.
    pub fn with_runtime(
        config: ClientConfig,
        clock: Arc<dyn Clock>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let mut subscribers = SubscriberRegistry::new();
        for (topic, subscriber) in config.subscribers {
            subscribers.subscribe(&topic, subscriber);
        }

        let shared = Arc::new_cyclic(|this| Shared {
            id: Uuid::new_v4().to_string(),
            url: config.url,
            tick_interval: config.tick_interval,
            reconnect_interval: config.reconnect_interval,
            clock,
            connector,
            this: this.clone(),
            inner: Mutex::new(ClientInner {
                state: ConnectionState::New,
                buffer: MessageBuffer::new(),
                subscribers,
                transport: None,
                ident: None,
                platform: None,
                tick_timer: None,
                reconnect_timer: None,
                listeners: ClientListeners::default(),
                effects: Vec::new(),
            }),
        });

        {
            let mut inner = shared.lock();
            shared.open_transport(&mut inner);
            shared.start_ticking(&mut inner);
        }
        info!("Client {} created for {}", shared.id, shared.url);

        Self { shared }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn ident(&self) -> Option<Value> {
        self.shared.lock().ident.clone()
    }

    pub fn platform(&self) -> Option<Value> {
        self.shared.lock().platform.clone()
    }

    /// Number of messages currently buffered.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn transport(&self) -> Option<TransportInfo> {
        let inner = self.shared.lock();
        if inner.is_disposed() {
            warn!("Invoked \"transport\" on a disposed client");
            return None;
        }
        inner.transport.as_ref().map(|t| TransportInfo {
            id: t.id().to_string(),
            ready: t.is_ready(),
            handshake: t.handshake().cloned(),
        })
    }

    /// Create and buffer a new message for `topic`. Returns `None` once disposed.
    ///
    /// Buffered messages are held until they are finalized or cancelled, so
    /// only create messages that will be sent.
    pub fn create_message(&self, topic: impl Into<String>) -> Option<Message> {
        let topic = topic.into();
        self.shared.with_inner(|inner| self.create_in(inner, topic))
    }

    fn create_in(&self, inner: &mut ClientInner, topic: String) -> Option<Message> {
        if inner.is_disposed() {
            warn!("Invoked \"create_message\" on a disposed client");
            return None;
        }
        let message = Message::new(Uuid::new_v4().to_string(), topic, self.shared.clock.now());
        inner.buffer.enqueue(message.clone());
        Some(message)
    }

    /// Create a message for `topic` unless one is already buffered.
    ///
    /// Calls `on_create` with the new message, or `on_existing` with every
    /// buffered message for the topic. Neither is called once disposed.
    pub fn create_if_none_for_topic(
        &self,
        topic: impl Into<String>,
        on_create: impl FnOnce(Message),
        on_existing: impl FnOnce(Vec<Message>),
    ) {
        let topic = topic.into();
        let outcome = self.shared.with_inner(|inner| {
            if inner.is_disposed() {
                warn!("Invoked \"create_if_none_for_topic\" on a disposed client");
                return None;
            }
            let existing = inner.buffer.for_topic(&topic);
            if !existing.is_empty() {
                return Some(Err(existing));
            }
            self.create_in(inner, topic).map(Ok)
        });

        match outcome {
            Some(Ok(message)) => on_create(message),
            Some(Err(existing)) => on_existing(existing),
            None => {}
        }
    }

    /// Register `subscriber` for broadcasts on `topic` and announce the
    /// updated topic list to the server.
    pub fn subscribe(&self, topic: &str, subscriber: Subscriber) -> Option<SubscriptionId> {
        self.shared.with_inner(|inner| {
            if inner.is_disposed() {
                warn!("Invoked \"subscribe\" on a disposed client");
                return None;
            }
            let id = inner.subscribers.subscribe(topic, subscriber);
            inner.synchronize_topics();
            Some(id)
        })
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.shared.with_inner(|inner| {
            if inner.is_disposed() {
                warn!("Invoked \"unsubscribe\" on a disposed client");
                return false;
            }
            let removed = inner.subscribers.unsubscribe(topic, id);
            inner.synchronize_topics();
            removed
        })
    }

    /// Stop the client: no further ticks, reconnects or callbacks.
    pub fn dispose(&self) {
        self.shared.with_inner(|inner| {
            if inner.is_disposed() {
                warn!("Invoked \"dispose\" on a disposed client");
                return;
            }
            inner.set_state(ConnectionState::Disposed);
            self.shared.shutdown(inner);
        });
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().is_disposed()
    }

    fn register<T>(
        &self,
        name: &str,
        add: impl FnOnce(&mut ClientListeners) -> T,
    ) -> Option<T> {
        let mut inner = self.shared.lock();
        if inner.is_disposed() {
            warn!("Invoked \"{name}\" on a disposed client");
            return None;
        }
        Some(add(&mut inner.listeners))
    }

    pub fn on_state_change(
        &self,
        f: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.register("on_state_change", |l| l.state.add(Arc::new(f)))
    }

    /// Responses, or attachments, for ids the client does not know.
    pub fn on_lost_message_response(
        &self,
        f: impl Fn(&str, &LostResponse) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.register("on_lost_message_response", |l| {
            l.lost_response.add(Arc::new(f))
        })
    }

    pub fn on_lost_acknowledged(
        &self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.register("on_lost_acknowledged", |l| {
            l.lost_acknowledged.add(Arc::new(f))
        })
    }

    pub fn on_message_rescheduled(
        &self,
        f: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.register("on_message_rescheduled", |l| l.rescheduled.add(Arc::new(f)))
    }

    /// Receive every [`ClientEvent`].
    pub fn on_event(
        &self,
        f: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.register("on_event", |l| l.events.add(Arc::new(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.shared.lock();
        let listeners = &mut inner.listeners;
        listeners.state.remove(id)
            || listeners.lost_response.remove(id)
            || listeners.lost_acknowledged.remove(id)
            || listeners.rescheduled.remove(id)
            || listeners.events.remove(id)
    }
}
