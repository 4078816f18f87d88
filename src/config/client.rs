use std::fmt;
use std::time::Duration;

use crate::client::subscribers::Subscriber;
use crate::config::settings::ClientSettings;

/// Runtime configuration for one [`crate::client::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    pub url: String,
    pub tick_interval: Duration,
    pub reconnect_interval: Duration,
    /// Subscribers registered before the first connection, in order.
    pub subscribers: Vec<(String, Subscriber)>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tick_interval: Duration::from_millis(5),
            reconnect_interval: Duration::from_millis(1000),
            subscribers: Vec::new(),
        }
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn subscriber(mut self, topic: impl Into<String>, subscriber: Subscriber) -> Self {
        self.subscribers.push((topic.into(), subscriber));
        self
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self::new(settings.url.clone())
            .tick_interval(Duration::from_millis(settings.tick_interval_ms))
            .reconnect_interval(Duration::from_millis(settings.reconnect_interval_ms))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<&str> = self.subscribers.iter().map(|(t, _)| t.as_str()).collect();
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("tick_interval", &self.tick_interval)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("subscribers", &topics)
            .finish()
    }
}
