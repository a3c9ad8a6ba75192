//! One WebSocket connection with keepalive and silence watchdog

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::AdapterError;
use crate::types::Venue;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_PING_INTERVAL_SECS: u64 = 15;
const DEFAULT_SILENCE_TIMEOUT_SECS: u64 = 45;

/// Ping cadence and silence limit for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// How often the venue ping is sent
    pub interval: Duration,
    /// Connection is declared lost after this long without any inbound frame
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_SILENCE_TIMEOUT_SECS),
        }
    }
}

/// Inbound frame worth surfacing to the protocol layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// WebSocket-level pong
    Pong,
}

/// Live WebSocket connection owned by one adapter
pub struct WsConnection {
    venue: Venue,
    stream: WsStream,
    keepalive: KeepaliveConfig,
    last_inbound: Instant,
    next_ping: Instant,
}

impl WsConnection {
    /// Open a connection, failing after `connect_timeout`
    pub async fn open(
        venue: Venue,
        url: &str,
        connect_timeout: Duration,
        keepalive: KeepaliveConfig,
    ) -> Result<Self, AdapterError> {
        let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| AdapterError::Connect {
                venue,
                reason: format!("timed out after {:?}", connect_timeout),
            })?
            .map_err(|e| AdapterError::Connect {
                venue,
                reason: e.to_string(),
            })?;

        info!(venue = %venue, url = %url, "WebSocket connected");

        let now = Instant::now();
        Ok(Self {
            venue,
            stream,
            keepalive,
            last_inbound: now,
            next_ping: now + keepalive.interval,
        })
    }

    pub async fn send(&mut self, message: Message) -> Result<(), AdapterError> {
        self.stream
            .send(message)
            .await
            .map_err(|e| AdapterError::Transport {
                venue: self.venue,
                reason: e.to_string(),
            })
    }

    pub async fn send_json(&mut self, frame: &Value) -> Result<(), AdapterError> {
        self.send(Message::Text(frame.to_string())).await
    }

    /// Wait for the next text frame or pong.
    ///
    /// Sends `ping()` every keepalive interval, answers WebSocket pings, and
    /// fails with `KeepaliveTimeout` once the connection has been silent for
    /// the keepalive timeout.
    pub async fn next_inbound<F>(&mut self, ping: F) -> Result<Inbound, AdapterError>
    where
        F: Fn() -> Message,
    {
        let venue = self.venue;
        loop {
            let silence_deadline = self.last_inbound + self.keepalive.timeout;
            let wake_at = silence_deadline.min(self.next_ping);

            tokio::select! {
                frame = self.stream.next() => {
                    let received_at = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.last_inbound = received_at;
                            return Ok(Inbound::Text(text));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.last_inbound = received_at;
                            match String::from_utf8(bytes) {
                                Ok(text) => return Ok(Inbound::Text(text)),
                                Err(_) => debug!(venue = %venue, "Dropping non-UTF-8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.last_inbound = received_at;
                            self.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.last_inbound = received_at;
                            return Ok(Inbound::Pong);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by server".to_string());
                            return Err(AdapterError::ConnectionClosed { venue, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            return Err(AdapterError::Transport {
                                venue,
                                reason: e.to_string(),
                            });
                        }
                        None => {
                            return Err(AdapterError::ConnectionClosed {
                                venue,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }

                _ = tokio::time::sleep_until(wake_at) => {
                    let now = Instant::now();
                    if now >= silence_deadline {
                        return Err(AdapterError::KeepaliveTimeout {
                            venue,
                            silent_for: now - self.last_inbound,
                        });
                    }
                    if now >= self.next_ping {
                        self.send(ping()).await?;
                        self.next_ping = now + self.keepalive.interval;
                    }
                }
            }
        }
    }

    /// Best-effort close handshake
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(venue = %self.venue, error = %e, "Close handshake failed");
        }
    }
}
