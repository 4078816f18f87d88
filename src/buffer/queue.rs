use std::collections::HashMap;

use tracing::{debug, trace};

use crate::buffer::message::Message;

/// Ordered collection of the messages a client is driving to completion.
///
/// Views return clones of the message handles so that callers can act on them
/// (and the buffer can change) without holding a borrow on the buffer.
#[derive(Default)]
pub struct MessageBuffer {
    order: Vec<String>,
    messages: HashMap<String, Message>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message; a message whose id is already buffered is ignored.
    pub fn enqueue(&mut self, message: Message) -> bool {
        if self.messages.contains_key(message.id()) {
            return false;
        }

        debug!("Enqueueing message {} for topic {}", message.id(), message.topic());
        self.order.push(message.id().to_string());
        self.messages.insert(message.id().to_string(), message);
        true
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every buffered message for `topic`, whatever its state.
    pub fn for_topic(&self, topic: &str) -> Vec<Message> {
        self.filter(|m| m.topic() == topic)
    }

    pub fn unsent(&self) -> Vec<Message> {
        self.filter(Message::is_unsent)
    }

    pub fn timed_out(&self, now: u64) -> Vec<Message> {
        self.filter(|m| m.is_timed_out(now))
    }

    pub fn ack_timed_out(&self, now: u64) -> Vec<Message> {
        self.filter(|m| m.is_ack_timed_out(now))
    }

    /// In-flight messages sent on a transport other than `current`.
    pub fn lost_transport(&self, current: &str) -> Vec<Message> {
        self.filter(|m| m.has_lost_transport(current))
    }

    pub fn remove_cancelled(&mut self) -> usize {
        self.remove_where("cancelled", Message::is_cancelled)
    }

    pub fn remove_acknowledged_notifications(&mut self) -> usize {
        self.remove_where(
            "acknowledged notification",
            Message::is_acknowledged_notification,
        )
    }

    /// Drop messages that must only go out over an established connection.
    pub fn remove_offline_unsent(&mut self) -> usize {
        self.remove_where("online-only", |m| {
            m.is_discarded_if_offline() && m.sent_at().is_none()
        })
    }

    pub fn remove_finalized(&mut self) -> usize {
        self.remove_where("finalized", Message::is_finalized)
    }

    fn filter(&self, predicate: impl Fn(&Message) -> bool) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id))
            .filter(|m| predicate(m))
            .cloned()
            .collect()
    }

    fn remove_where(&mut self, reason: &str, predicate: impl Fn(&Message) -> bool) -> usize {
        let removed: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.messages.get(*id).is_some_and(&predicate))
            .cloned()
            .collect();

        if removed.is_empty() {
            return 0;
        }

        trace!("Removing {reason} messages from buffer: {removed:?}");
        for id in &removed {
            self.messages.remove(id);
        }
        self.order.retain(|id| self.messages.contains_key(id));
        removed.len()
    }
}
