//! Topic registry
//!
//! Maps topics to broadcast subscribers. Entries are kept in subscription
//! order; a subscriber may be registered for several topics.

use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

/// Server-pushed payload for a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub topic: String,
    pub payload: Value,
}

pub type SubscriberError = Box<dyn StdError + Send + Sync>;

pub type Subscriber = Arc<dyn Fn(&Broadcast) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry {
    id: SubscriptionId,
    topic: String,
    subscriber: Subscriber,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Vec<Entry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for `topic`. Registering the same subscriber for
    /// the same topic again returns the existing id.
    pub fn subscribe(&mut self, topic: &str, subscriber: Subscriber) -> SubscriptionId {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.topic == topic && Arc::ptr_eq(&e.subscriber, &subscriber))
        {
            return entry.id;
        }

        let id = SubscriptionId::next();
        self.entries.push(Entry {
            id,
            topic: topic.to_string(),
            subscriber,
        });
        id
    }

    pub fn unsubscribe(&mut self, topic: &str, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.topic == topic && e.id == id));
        before != self.entries.len()
    }

    pub fn for_topic(&self, topic: &str) -> Vec<Subscriber> {
        self.entries
            .iter()
            .filter(|e| e.topic == topic)
            .map(|e| e.subscriber.clone())
            .collect()
    }

    /// Distinct topics, in order of first subscription.
    pub fn known_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !topics.contains(&entry.topic) {
                topics.push(entry.topic.clone());
            }
        }
        topics
    }
}
