//! CLI for Tickwire
//!
//! Subcommands:
//! - `listen`: subscribe to topics and print broadcasts
//! - `send`: send one message and print its outcome

use std::error::Error as StdError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tickwire::config::{Settings, load_config};
use tickwire::utils::logging;
use tickwire::{Broadcast, Client, ClientConfig, Outcome, Subscriber, SubscriberError};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "tickwire")]
struct Cli {
    /// Server URL; overrides the configured one
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to topics and print every broadcast until interrupted
    Listen {
        #[arg(required = true)]
        topics: Vec<String>,
    },
    /// Send a single JSON message and print the outcome
    Send {
        topic: String,
        payload: String,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        /// Send as a notification and wait for the acknowledgement only
        #[arg(long)]
        notify: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = load_config();
    let level = settings
        .as_ref()
        .map(|s| s.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    logging::init(&level);

    let settings = settings.unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {e}");
        Settings::default()
    });

    let cli = Cli::parse();

    let mut client_settings = settings.client;
    if let Some(url) = cli.url {
        client_settings.url = url;
    }
    let config = ClientConfig::from(&client_settings);

    let result = match cli.command {
        Command::Listen { topics } => listen(config, topics).await,
        Command::Send {
            topic,
            payload,
            timeout_ms,
            notify,
        } => send(config, topic, &payload, Duration::from_millis(timeout_ms), notify).await,
    };

    if let Err(e) = result {
        error!("Client failed: {e}");
    }
}

async fn listen(config: ClientConfig, topics: Vec<String>) -> Result<(), Box<dyn StdError>> {
    let client = Client::new(config)?;
    client.on_state_change(|new, old| info!("Connection {old} -> {new}"));

    let printer: Subscriber = Arc::new(|broadcast: &Broadcast| -> Result<(), SubscriberError> {
        println!("{}: {}", broadcast.topic, broadcast.payload);
        Ok(())
    });
    for topic in &topics {
        client.subscribe(topic, printer.clone());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    client.dispose();
    Ok(())
}

async fn send(
    config: ClientConfig,
    topic: String,
    payload: &str,
    timeout: Duration,
    notify: bool,
) -> Result<(), Box<dyn StdError>> {
    let payload: Value = serde_json::from_str(payload)?;
    let client = Client::new(config)?;
    let message = client
        .create_message(topic)
        .ok_or("client was disposed")?;

    let (tx, rx) = oneshot::channel::<String>();
    let tx = Mutex::new(Some(tx));
    let done = Arc::new(move |line: String| {
        if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(line);
        }
    });

    {
        let done = done.clone();
        message.finally(move |_, outcome| {
            done(match outcome {
                Outcome::Completed(response) => response.payload.to_string(),
                Outcome::Failed(error) => format!("error: {error}"),
                Outcome::TimedOut => "timed out waiting for a response".to_string(),
                Outcome::AckTimedOut => "timed out waiting for an acknowledgement".to_string(),
            })
        });
    }

    if notify {
        message.when_acknowledged(move |m, _| done(format!("{} acknowledged", m.id())));
        message.with_ack_timeout(timeout).notify(payload)?;
    } else {
        message.with_timeout(timeout).send(payload)?;
    }

    tokio::select! {
        outcome = rx => match outcome {
            Ok(line) => println!("{line}"),
            Err(_) => warn!("Client stopped before the message was resolved"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    client.dispose();
    Ok(())
}
