use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Connection and scheduling parameters for a client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
    /// Period of the reconciliation tick.
    pub tick_interval_ms: u64,
    /// Delay before a closed connection is replaced.
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub tick_interval_ms: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                tick_interval_ms: 5,
                reconnect_interval_ms: 1000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let client = self.client.as_ref();
        let logging = self.logging.as_ref();

        Settings {
            client: ClientSettings {
                url: client
                    .and_then(|c| c.url.clone())
                    .unwrap_or(default.client.url),
                tick_interval_ms: client
                    .and_then(|c| c.tick_interval_ms)
                    .unwrap_or(default.client.tick_interval_ms),
                reconnect_interval_ms: client
                    .and_then(|c| c.reconnect_interval_ms)
                    .unwrap_or(default.client.reconnect_interval_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
