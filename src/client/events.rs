//! Client side of the server push channel
//!
//! Subscribes to the SSE stream and reconnects with exponential backoff when
//! the connection drops. Events are refresh hints only; a missed event is
//! never an error.

use crate::events::ServerEvent;
use backoff::{backoff::Backoff, ExponentialBackoff};
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Delay before each reconnect attempt: starts at the initial delay, grows by
/// the multiplier up to the cap, and starts over after `reset`.
pub struct ReconnectPolicy {
    backoff: ExponentialBackoff,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_delay_ms);
        let mut backoff = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: config.multiplier,
            max_interval: Duration::from_millis(config.max_delay_ms),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        Self { backoff }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval)
    }

    pub fn reset(&mut self) {
        self.backoff.reset();
    }
}

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Input is buffered as raw bytes and only complete lines are decoded, so a
/// multi-byte character split across reads stays intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every message completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    messages.push(SseMessage {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        messages
    }
}

/// Keeps an SSE connection to `/api/events` open and forwards server events.
pub struct EventSubscriber {
    client: reqwest::Client,
    url: String,
    config: ReconnectConfig,
}

impl EventSubscriber {
    pub fn new(base_url: &str, config: ReconnectConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/api/events", base_url.trim_end_matches('/')),
            config,
        }
    }

    /// Run until `cancel` fires or the receiver is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<ServerEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<ServerEvent>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(&self.config);

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.client.get(&self.url).send() => result.and_then(|r| r.error_for_status()),
            };

            match connected {
                Ok(response) => {
                    policy.reset();
                    tracing::info!(url = %self.url, "Event stream connected");

                    let mut stream = response.bytes_stream();
                    let mut parser = SseParser::new();
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(bytes)) => {
                                for message in parser.feed(&bytes) {
                                    if !forward(&tx, message).await {
                                        return;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Event stream error");
                                break;
                            }
                            None => {
                                tracing::info!("Event stream closed by server");
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(url = %self.url, error = %e, "Event stream connection failed"),
            }

            let delay = policy.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting to event stream");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Returns false once nobody is listening.
async fn forward(tx: &mpsc::Sender<ServerEvent>, message: SseMessage) -> bool {
    let Some(name) = message.event else {
        tracing::trace!(data = %message.data, "Untyped event message");
        return true;
    };

    match ServerEvent::parse(&name, &message.data) {
        Some(Ok(event)) => tx.send(event).await.is_ok(),
        Some(Err(e)) => {
            tracing::warn!(event = %name, error = %e, "Malformed event payload");
            true
        }
        None => {
            tracing::debug!(event = %name, "Unknown event type");
            true
        }
    }
}
