//! Venue adapters (Binance, CEX.IO, Gate.io)
//!
//! Every venue runs the same [`StreamingAdapter`]; what differs per venue
//! (URLs, subscribe/auth framing, frame classification) lives in its
//! [`VenueProtocol`] implementation.

mod auth;
mod binance;
mod cex;
mod connection;
mod fields;
mod gate;

pub use auth::Credentials;
pub use binance::{Binance, BINANCE_WS_URL};
pub use cex::{Cex, CEX_WS_URL};
pub use connection::{Inbound, KeepaliveConfig, WsConnection};
pub use gate::{Gate, GATE_WS_URL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{AdapterError, DecodeError};
use crate::feed::{SubscriptionKind, VenueEvent};
use crate::types::Venue;

pub type BinanceAdapter = StreamingAdapter<Binance>;
pub type CexAdapter = StreamingAdapter<Cex>;
pub type GateAdapter = StreamingAdapter<Gate>;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection lifecycle of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Subscribed,
    Streaming,
}

impl AdapterState {
    /// States in which frames may be sent
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            AdapterState::Connected
                | AdapterState::Authenticated
                | AdapterState::Subscribed
                | AdapterState::Streaming
        )
    }
}

/// What a subscribe call put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    pub venue: Venue,
    pub kind: SubscriptionKind,
    /// Venue-native instruments
    pub instruments: Vec<String>,
    pub request_id: u64,
}

/// Uniform capability set of a venue connection
#[async_trait]
pub trait VenueAdapter: Send {
    fn venue(&self) -> Venue;

    fn state(&self) -> AdapterState;

    /// Whether `authenticate` will send a signed frame
    fn requires_auth(&self) -> bool;

    /// Open the connection. Failures are reported, never retried here.
    async fn connect(&mut self) -> Result<(), AdapterError>;

    /// Send the venue's signed auth frame; no-op without credentials
    async fn authenticate(&mut self) -> Result<(), AdapterError>;

    /// Subscribe to `kind` data for venue-native `instruments`
    async fn subscribe(
        &mut self,
        kind: SubscriptionKind,
        instruments: &[String],
    ) -> Result<SubscriptionAck, AdapterError>;

    /// Next routable event. Unknown and malformed frames are skipped.
    /// Connection failures leave the adapter `Disconnected`.
    async fn next_event(&mut self) -> Result<VenueEvent, AdapterError>;

    async fn disconnect(&mut self);
}

/// Decoded frame plus an optional reply the venue expects (e.g. pong)
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: VenueEvent,
    pub reply: Option<Value>,
}

impl Decoded {
    pub fn event(event: VenueEvent) -> Self {
        Self { event, reply: None }
    }

    pub fn with_reply(event: VenueEvent, reply: Value) -> Self {
        Self {
            event,
            reply: Some(reply),
        }
    }
}

/// Venue-specific wire format
pub trait VenueProtocol: Send + Sync + 'static {
    fn venue(&self) -> Venue;

    fn default_url(&self) -> &'static str;

    fn supports_auth(&self) -> bool;

    /// Signed auth frame; `None` when the venue has no auth step
    fn auth_frame(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, AdapterError>;

    /// Frames that subscribe `instruments` to `kind`
    fn subscribe_frames(
        &self,
        kind: SubscriptionKind,
        instruments: &[String],
        request_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Value>, AdapterError>;

    /// Keepalive ping
    fn ping(&self, now: DateTime<Utc>) -> Message;

    fn decode(&self, text: &str) -> Result<Decoded, DecodeError>;
}

/// Connection settings for one adapter
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub keepalive: KeepaliveConfig,
}

impl AdapterSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// WebSocket adapter generic over the venue protocol
pub struct StreamingAdapter<P: VenueProtocol> {
    protocol: P,
    settings: AdapterSettings,
    credentials: Option<Credentials>,
    state: AdapterState,
    connection: Option<WsConnection>,
    next_request_id: u64,
}

impl<P: VenueProtocol> StreamingAdapter<P> {
    pub fn new(protocol: P, settings: AdapterSettings) -> Self {
        Self {
            protocol,
            settings,
            credentials: None,
            state: AdapterState::Disconnected,
            connection: None,
            next_request_id: 1,
        }
    }

    /// Adapter on the venue's public endpoint with default timeouts
    pub fn with_defaults(protocol: P) -> Self {
        let settings = AdapterSettings::new(protocol.default_url());
        Self::new(protocol, settings)
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    fn invalid_state(&self, operation: &'static str) -> AdapterError {
        AdapterError::InvalidState {
            venue: self.protocol.venue(),
            operation,
            state: self.state,
        }
    }

    /// Drop the connection after a failure on it
    fn mark_lost(&mut self) {
        self.connection = None;
        self.state = AdapterState::Disconnected;
    }

    async fn send_frames(&mut self, frames: &[Value]) -> Result<(), AdapterError> {
        let venue = self.protocol.venue();
        let connection = self
            .connection
            .as_mut()
            .ok_or(AdapterError::NotConnected(venue))?;
        let mut outcome = Ok(());
        for frame in frames {
            if let Err(e) = connection.send_json(frame).await {
                outcome = Err(e);
                break;
            }
        }
        if outcome.is_err() {
            self.mark_lost();
        }
        outcome
    }
}

/// Pull frames until one decodes into a routable event
async fn read_event<P: VenueProtocol>(
    protocol: &P,
    connection: &mut WsConnection,
) -> Result<VenueEvent, AdapterError> {
    let venue = protocol.venue();
    loop {
        let text = match connection.next_inbound(|| protocol.ping(Utc::now())).await? {
            Inbound::Pong => return Ok(VenueEvent::KeepaliveResponse),
            Inbound::Text(text) => text,
        };

        match protocol.decode(&text) {
            Ok(decoded) => {
                if let Some(reply) = decoded.reply {
                    connection.send_json(&reply).await?;
                }
                match decoded.event {
                    VenueEvent::Unknown(frame) => {
                        debug!(venue = %venue, frame = %frame, "Skipping unroutable frame");
                    }
                    event => return Ok(event),
                }
            }
            Err(e) => {
                warn!(venue = %venue, error = %e, "Skipping malformed frame");
            }
        }
    }
}

#[async_trait]
impl<P: VenueProtocol> VenueAdapter for StreamingAdapter<P> {
    fn venue(&self) -> Venue {
        self.protocol.venue()
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    fn requires_auth(&self) -> bool {
        self.protocol.supports_auth() && self.credentials.is_some()
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        if let Some(previous) = self.connection.take() {
            previous.close().await;
        }

        let venue = self.protocol.venue();
        self.state = AdapterState::Connecting;
        match WsConnection::open(
            venue,
            &self.settings.url,
            self.settings.connect_timeout,
            self.settings.keepalive,
        )
        .await
        {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = AdapterState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = AdapterState::Disconnected;
                Err(e)
            }
        }
    }

    async fn authenticate(&mut self) -> Result<(), AdapterError> {
        let venue = self.protocol.venue();
        match self.state {
            AdapterState::Connected => {}
            AdapterState::Authenticated => return Ok(()),
            _ => return Err(self.invalid_state("authenticate")),
        }

        if !self.protocol.supports_auth() {
            return Ok(());
        }
        let Some(credentials) = self.credentials.as_ref() else {
            warn!(venue = %venue, "No API credentials configured; using public channels only");
            return Ok(());
        };

        let Some(frame) = self.protocol.auth_frame(credentials, Utc::now())? else {
            return Ok(());
        };

        self.state = AdapterState::Authenticating;
        self.send_frames(&[frame]).await?;
        self.state = AdapterState::Authenticated;
        info!(venue = %venue, "Auth frame sent");
        Ok(())
    }

    async fn subscribe(
        &mut self,
        kind: SubscriptionKind,
        instruments: &[String],
    ) -> Result<SubscriptionAck, AdapterError> {
        let venue = self.protocol.venue();
        if !self.state.is_open() {
            return Err(self.invalid_state("subscribe"));
        }
        if instruments.is_empty() {
            return Err(AdapterError::EmptySubscription { venue, kind });
        }

        let request_id = self.next_request_id;
        let frames = self
            .protocol
            .subscribe_frames(kind, instruments, request_id, Utc::now())?;
        self.send_frames(&frames).await?;
        self.next_request_id += 1;

        if self.state != AdapterState::Streaming {
            self.state = AdapterState::Subscribed;
        }
        info!(
            venue = %venue,
            kind = %kind,
            instruments = ?instruments,
            "Subscription sent"
        );

        Ok(SubscriptionAck {
            venue,
            kind,
            instruments: instruments.to_vec(),
            request_id,
        })
    }

    async fn next_event(&mut self) -> Result<VenueEvent, AdapterError> {
        let venue = self.protocol.venue();
        let Some(connection) = self.connection.as_mut() else {
            return Err(AdapterError::NotConnected(venue));
        };

        match read_event(&self.protocol, connection).await {
            Ok(event) => {
                if self.state == AdapterState::Subscribed {
                    self.state = AdapterState::Streaming;
                }
                Ok(event)
            }
            Err(e) => {
                self.mark_lost();
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
            info!(venue = %self.protocol.venue(), "Disconnected");
        }
        self.state = AdapterState::Disconnected;
    }
}

/// Build the adapter for `venue`
pub fn build_adapter(
    venue: Venue,
    settings: AdapterSettings,
    credentials: Option<Credentials>,
) -> Box<dyn VenueAdapter> {
    match venue {
        Venue::Binance => Box::new(BinanceAdapter::new(Binance, settings)),
        Venue::Cex => Box::new(CexAdapter::new(Cex, settings).with_credentials(credentials)),
        Venue::Gate => Box::new(GateAdapter::new(Gate, settings).with_credentials(credentials)),
    }
}

/// Public endpoint of a venue
pub fn default_url(venue: Venue) -> &'static str {
    match venue {
        Venue::Binance => BINANCE_WS_URL,
        Venue::Cex => CEX_WS_URL,
        Venue::Gate => GATE_WS_URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_adapter_starts_disconnected() {
        let adapter = BinanceAdapter::with_defaults(Binance);
        assert_eq!(adapter.state(), AdapterState::Disconnected);
        assert_eq!(adapter.venue(), Venue::Binance);
        assert!(!adapter.requires_auth());
    }

    #[test]
    fn auth_required_only_with_credentials() {
        let anonymous = CexAdapter::with_defaults(Cex);
        assert!(!anonymous.requires_auth());

        let signed = GateAdapter::with_defaults(Gate)
            .with_credentials(Some(Credentials::new("key", "secret")));
        assert!(signed.requires_auth());

        // Binance market streams are public; credentials are ignored
        let binance = BinanceAdapter::with_defaults(Binance)
            .with_credentials(Some(Credentials::new("key", "secret")));
        assert!(!binance.requires_auth());
    }

    #[tokio::test]
    async fn operations_before_connect_are_rejected() {
        let mut adapter = GateAdapter::with_defaults(Gate);

        let err = adapter.authenticate().await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidState { operation: "authenticate", .. }));

        let err = adapter
            .subscribe(SubscriptionKind::Ticker, &["BTC_USDT".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidState { operation: "subscribe", .. }));

        let err = adapter.next_event().await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected(Venue::Gate)));
    }

    #[tokio::test]
    async fn build_adapter_picks_protocol_by_venue() {
        for venue in Venue::ALL {
            let adapter = build_adapter(venue, AdapterSettings::new(default_url(venue)), None);
            assert_eq!(adapter.venue(), venue);
        }
    }
}
