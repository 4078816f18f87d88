//! Message lifecycle
//!
//! A [`Message`] is a cheap, clonable handle shared by the application (which
//! configures and sends it) and the buffer (which drives it to completion).
//!
//! Lifecycle: `unset -> ready (send | notify) -> sent -> acknowledged? ->
//! completed | failed | timed out | ack timed out -> finalized`, with
//! `cancelled` reachable from any non-finalized state. Once finalized or
//! cancelled no completion listener fires again.
//!
//! State transitions happen under the message's own lock; listeners are never
//! invoked under it. Completion methods return an [`Effect`] that the caller
//! runs after releasing every lock it holds.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::transport::frame::{ClientFrame, Payload};
use crate::utils::error::{Error, Result};
use crate::utils::listeners::{Effect, Listeners, dispatch, report};

/// Data received in reply to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub payload: Value,
    pub attachment: Option<Vec<u8>>,
}

/// How a message was finalized; handed to `finally` listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Response),
    Failed(Value),
    TimedOut,
    AckTimedOut,
}

type CompleteFn = dyn Fn(&Message, &Response) + Send + Sync;
type ErrorFn = dyn Fn(&Message, &Value) + Send + Sync;
type FinallyFn = dyn Fn(&Message, &Outcome) + Send + Sync;
type AcknowledgedFn = dyn Fn(&Message, u64) + Send + Sync;
type TimedFn = dyn Fn(&Message) + Send + Sync;

#[derive(Default)]
struct Handlers {
    complete: Listeners<CompleteFn>,
    error: Listeners<ErrorFn>,
    finally: Listeners<FinallyFn>,
    acknowledged: Listeners<AcknowledgedFn>,
    timed: Listeners<TimedFn>,
    ack_timed: Listeners<TimedFn>,
}

struct State {
    created_at: u64,
    sent_at: Option<u64>,
    acknowledged_at: Option<u64>,
    responded_at: Option<u64>,

    timeout: Option<Duration>,
    ack_timeout: Option<Duration>,

    notification: bool,
    discard_if_offline: bool,
    expect_attachment: bool,

    ready: bool,
    cancelled: bool,
    finalized: bool,

    payload: Option<Value>,
    response: Option<Value>,
    attachment: Option<Vec<u8>>,

    transport_id: Option<String>,
    handlers: Handlers,
}

impl State {
    fn can_handle(&self) -> bool {
        !self.cancelled && !self.finalized
    }

    fn elapsed_since_sent(&self, now: u64, limit: Option<Duration>) -> bool {
        match (self.sent_at, limit) {
            (Some(sent_at), Some(limit)) => {
                u128::from(now.saturating_sub(sent_at)) >= limit.as_millis()
            }
            _ => false,
        }
    }
}

struct Inner {
    id: String,
    topic: String,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Message {
    inner: Arc<Inner>,
}

impl Message {
    pub(crate) fn new(id: impl Into<String>, topic: impl Into<String>, created_at: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                topic: topic.into(),
                state: Mutex::new(State {
                    created_at,
                    sent_at: None,
                    acknowledged_at: None,
                    responded_at: None,
                    timeout: None,
                    ack_timeout: None,
                    notification: false,
                    discard_if_offline: false,
                    expect_attachment: false,
                    ready: false,
                    cancelled: false,
                    finalized: false,
                    payload: None,
                    response: None,
                    attachment: None,
                    transport_id: None,
                    handlers: Handlers::default(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Fail with `on_timed_out` when no response arrives within `timeout` of sending.
    pub fn with_timeout(&self, timeout: Duration) -> &Self {
        self.state().timeout = Some(timeout);
        self
    }

    /// Fail with `on_ack_timed_out` when no acknowledgement arrives within `timeout` of sending.
    pub fn with_ack_timeout(&self, timeout: Duration) -> &Self {
        self.state().ack_timeout = Some(timeout);
        self
    }

    /// Drop the message instead of queueing it while the transport is not ready.
    pub fn only_if_connected(&self) -> &Self {
        self.state().discard_if_offline = true;
        self
    }

    /// Complete only once both the response payload and a binary attachment arrived.
    pub fn expect_attachment(&self) -> &Self {
        self.state().expect_attachment = true;
        self
    }

    pub fn then(&self, f: impl Fn(&Message, &Response) + Send + Sync + 'static) -> &Self {
        self.state().handlers.complete.add(Arc::new(f));
        self
    }

    pub fn or_else(&self, f: impl Fn(&Message, &Value) + Send + Sync + 'static) -> &Self {
        self.state().handlers.error.add(Arc::new(f));
        self
    }

    pub fn finally(&self, f: impl Fn(&Message, &Outcome) + Send + Sync + 'static) -> &Self {
        self.state().handlers.finally.add(Arc::new(f));
        self
    }

    pub fn when_acknowledged(&self, f: impl Fn(&Message, u64) + Send + Sync + 'static) -> &Self {
        self.state().handlers.acknowledged.add(Arc::new(f));
        self
    }

    pub fn when_timed_out(&self, f: impl Fn(&Message) + Send + Sync + 'static) -> &Self {
        self.state().handlers.timed.add(Arc::new(f));
        self
    }

    pub fn when_ack_timed_out(&self, f: impl Fn(&Message) + Send + Sync + 'static) -> &Self {
        self.state().handlers.ack_timed.add(Arc::new(f));
        self
    }

    /// Schedule as a request expecting a response.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<&Self> {
        self.schedule(payload.into(), false)
    }

    /// Schedule as a fire-and-forget notification; acknowledgement is terminal.
    pub fn notify(&self, payload: impl Into<Payload>) -> Result<&Self> {
        self.schedule(payload.into(), true)
    }

    fn schedule(&self, payload: Payload, notification: bool) -> Result<&Self> {
        let mut state = self.state();
        if state.ready || state.sent_at.is_some() {
            return Err(Error::AlreadyScheduled {
                id: self.inner.id.clone(),
            });
        }
        state.payload = Some(payload.into_json()?);
        state.notification = notification;
        state.ready = true;
        Ok(self)
    }

    /// Cooperative cancellation; in-flight I/O is not interrupted.
    pub fn cancel(&self) -> &Self {
        self.state().cancelled = true;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().cancelled
    }

    pub fn is_finalized(&self) -> bool {
        self.state().finalized
    }

    pub fn is_notification(&self) -> bool {
        self.state().notification
    }

    pub fn is_discarded_if_offline(&self) -> bool {
        self.state().discard_if_offline
    }

    pub fn created_at(&self) -> u64 {
        self.state().created_at
    }

    pub fn sent_at(&self) -> Option<u64> {
        self.state().sent_at
    }

    pub fn acknowledged_at(&self) -> Option<u64> {
        self.state().acknowledged_at
    }

    pub fn responded_at(&self) -> Option<u64> {
        self.state().responded_at
    }

    pub fn response(&self) -> Option<Value> {
        self.state().response.clone()
    }

    pub fn attachment(&self) -> Option<Vec<u8>> {
        self.state().attachment.clone()
    }

    /// Id of the transport that last sent this message.
    pub fn transport_id(&self) -> Option<String> {
        self.state().transport_id.clone()
    }

    pub(crate) fn is_unsent(&self) -> bool {
        let state = self.state();
        state.ready && state.sent_at.is_none()
    }

    pub(crate) fn is_timed_out(&self, now: u64) -> bool {
        let state = self.state();
        state.responded_at.is_none() && state.elapsed_since_sent(now, state.timeout)
    }

    pub(crate) fn is_ack_timed_out(&self, now: u64) -> bool {
        let state = self.state();
        state.acknowledged_at.is_none() && state.elapsed_since_sent(now, state.ack_timeout)
    }

    pub(crate) fn is_acknowledged_notification(&self) -> bool {
        let state = self.state();
        state.notification && state.acknowledged_at.is_some()
    }

    /// Sent on a transport other than `current`, and still awaiting completion.
    pub(crate) fn has_lost_transport(&self, current: &str) -> bool {
        let state = self.state();
        state.sent_at.is_some()
            && state.ready
            && state.can_handle()
            && state.transport_id.as_deref() != Some(current)
    }

    /// The wire frame for this message, once it has a payload.
    pub(crate) fn frame(&self) -> Option<ClientFrame> {
        let state = self.state();
        state.payload.as_ref().map(|payload| ClientFrame::Message {
            id: self.inner.id.clone(),
            topic: self.inner.topic.clone(),
            payload: payload.clone(),
            notify: state.notification,
        })
    }

    pub(crate) fn mark_sent(&self, transport_id: &str, now: u64) {
        let mut state = self.state();
        state.sent_at = Some(now);
        state.transport_id = Some(transport_id.to_string());
    }

    /// Return to "ready, unsent" so the next send pass transmits it again.
    pub(crate) fn reschedule(&self) {
        let mut state = self.state();
        if !state.can_handle() {
            return;
        }
        state.sent_at = None;
        state.acknowledged_at = None;
        state.responded_at = None;
        state.response = None;
        state.attachment = None;
        state.transport_id = None;
    }

    /// Record an acknowledgement. Only cancellation blocks it; a late
    /// acknowledgement of a finalized message still reaches its listeners.
    pub(crate) fn acknowledge(&self, now: u64) -> Option<Effect> {
        let handlers = {
            let mut state = self.state();
            if state.cancelled {
                return None;
            }
            state.acknowledged_at = Some(now);
            state.handlers.acknowledged.snapshot()
        };

        let message = self.clone();
        Some(Box::new(move || {
            let failures = dispatch(&handlers, |h| h(&message, now));
            report(message.id(), &failures);
        }))
    }

    pub(crate) fn set_response_payload(&self, payload: Value, now: u64) -> Option<Effect> {
        {
            let mut state = self.state();
            if !state.can_handle() {
                return None;
            }
            state.response = Some(payload);
        }
        self.complete_if_responded(now)
    }

    pub(crate) fn set_response_attachment(&self, attachment: Vec<u8>, now: u64) -> Option<Effect> {
        {
            let mut state = self.state();
            if !state.can_handle() {
                return None;
            }
            state.attachment = Some(attachment);
        }
        self.complete_if_responded(now)
    }

    fn complete_if_responded(&self, now: u64) -> Option<Effect> {
        let response = {
            let mut state = self.state();
            let complete = state.response.is_some()
                && (!state.expect_attachment || state.attachment.is_some());
            if !complete {
                return None;
            }
            state.responded_at = Some(now);
            Response {
                payload: state.response.clone().unwrap_or(Value::Null),
                attachment: state.attachment.clone(),
            }
        };
        self.complete(response)
    }

    pub(crate) fn complete(&self, response: Response) -> Option<Effect> {
        let (handlers, finally) = {
            let state = self.finalize()?;
            (
                state.handlers.complete.snapshot(),
                state.handlers.finally.snapshot(),
            )
        };

        let message = self.clone();
        Some(Box::new(move || {
            let mut failures = dispatch(&handlers, |h| h(&message, &response));
            let outcome = Outcome::Completed(response);
            failures.extend(dispatch(&finally, |h| h(&message, &outcome)));
            report(message.id(), &failures);
        }))
    }

    pub(crate) fn complete_failed(&self, error: Value) -> Option<Effect> {
        let (handlers, finally) = {
            let state = self.finalize()?;
            (
                state.handlers.error.snapshot(),
                state.handlers.finally.snapshot(),
            )
        };

        let message = self.clone();
        Some(Box::new(move || {
            let mut failures = dispatch(&handlers, |h| h(&message, &error));
            let outcome = Outcome::Failed(error);
            failures.extend(dispatch(&finally, |h| h(&message, &outcome)));
            report(message.id(), &failures);
        }))
    }

    pub(crate) fn complete_timed_out(&self) -> Option<Effect> {
        let (handlers, finally) = {
            let state = self.finalize()?;
            (
                state.handlers.timed.snapshot(),
                state.handlers.finally.snapshot(),
            )
        };
        Some(self.timed_effect(handlers, finally, Outcome::TimedOut))
    }

    pub(crate) fn complete_ack_timed_out(&self) -> Option<Effect> {
        let (handlers, finally) = {
            let state = self.finalize()?;
            (
                state.handlers.ack_timed.snapshot(),
                state.handlers.finally.snapshot(),
            )
        };
        Some(self.timed_effect(handlers, finally, Outcome::AckTimedOut))
    }

    fn timed_effect(
        &self,
        handlers: Vec<Arc<TimedFn>>,
        finally: Vec<Arc<FinallyFn>>,
        outcome: Outcome,
    ) -> Effect {
        let message = self.clone();
        Box::new(move || {
            let mut failures = dispatch(&handlers, |h| h(&message));
            failures.extend(dispatch(&finally, |h| h(&message, &outcome)));
            report(message.id(), &failures);
        })
    }

    /// Accept a completion attempt: `None` when cancelled or already finalized.
    fn finalize(&self) -> Option<MutexGuard<'_, State>> {
        let mut state = self.state();
        if !state.can_handle() {
            return None;
        }
        state.finalized = true;
        Some(state)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Message")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .field("ready", &state.ready)
            .field("notification", &state.notification)
            .field("sent_at", &state.sent_at)
            .field("acknowledged_at", &state.acknowledged_at)
            .field("cancelled", &state.cancelled)
            .field("finalized", &state.finalized)
            .finish()
    }
}
