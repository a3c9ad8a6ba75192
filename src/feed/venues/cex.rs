//! CEX.IO WebSocket API
//!
//! Every frame carries its type in the `e` field. Pairs are written
//! `BTC:USD`; the server pings and expects `{"e":"pong"}` back.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use super::fields;
use super::{Credentials, Decoded, VenueProtocol};
use crate::error::{AdapterError, DecodeError};
use crate::feed::{MarketFrame, SubscriptionKind, TickerUpdate, VenueEvent};
use crate::types::Venue;

pub const CEX_WS_URL: &str = "wss://ws.cex.io/ws/";

#[derive(Debug, Clone, Copy, Default)]
pub struct Cex;

impl Cex {
    fn room(kind: SubscriptionKind, pair: &str) -> Result<String, AdapterError> {
        match kind {
            SubscriptionKind::Ticker => Ok(format!("tickers:{}", pair)),
            SubscriptionKind::OrderBook => Ok(format!("order_book:{}", pair)),
            SubscriptionKind::Trades => Ok(format!("trades:{}", pair)),
            SubscriptionKind::Candles => Err(AdapterError::UnsupportedSubscription {
                venue: Venue::Cex,
                kind,
            }),
        }
    }

    fn pair_of(data: &Value) -> Option<String> {
        if let Some(pair) = data.get("pair").and_then(Value::as_str) {
            return Some(pair.to_string());
        }
        let base = data.get("symbol1").and_then(Value::as_str)?;
        let quote = data.get("symbol2").and_then(Value::as_str)?;
        Some(format!("{}:{}", base, quote))
    }

    fn ticker(data: &Value) -> Result<TickerUpdate, DecodeError> {
        let native_symbol = Self::pair_of(data).ok_or(DecodeError::MissingField("pair"))?;
        let price = fields::first_number(data, &["price", "last"])?;

        Ok(TickerUpdate {
            native_symbol,
            price,
            bid: fields::optional_number(data, "bid")?.unwrap_or(price),
            ask: fields::optional_number(data, "ask")?.unwrap_or(price),
            exchange_ts: data.get("timestamp").and_then(Value::as_i64),
        })
    }

    fn market_frame(frame: &Value) -> MarketFrame {
        let data = frame.get("data").cloned().unwrap_or(Value::Null);
        MarketFrame {
            native_symbol: Self::pair_of(&data),
            data,
        }
    }
}

impl VenueProtocol for Cex {
    fn venue(&self) -> Venue {
        Venue::Cex
    }

    fn default_url(&self) -> &'static str {
        CEX_WS_URL
    }

    fn supports_auth(&self) -> bool {
        true
    }

    fn auth_frame(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, AdapterError> {
        let timestamp = now.timestamp();
        let signature = credentials
            .sign_sha256_hex(&timestamp.to_string())
            .map_err(|e| AdapterError::Auth {
                venue: Venue::Cex,
                reason: e.to_string(),
            })?;

        Ok(Some(json!({
            "e": "auth",
            "auth": {
                "key": credentials.api_key,
                "signature": signature,
                "timestamp": timestamp,
            }
        })))
    }

    fn subscribe_frames(
        &self,
        kind: SubscriptionKind,
        instruments: &[String],
        _request_id: u64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Value>, AdapterError> {
        instruments
            .iter()
            .map(|pair| {
                let room = Self::room(kind, pair)?;
                Ok(json!({"e": "subscribe", "rooms": [room]}))
            })
            .collect()
    }

    fn ping(&self, _now: DateTime<Utc>) -> Message {
        Message::Text(json!({"e": "ping"}).to_string())
    }

    fn decode(&self, text: &str) -> Result<Decoded, DecodeError> {
        let frame: Value = serde_json::from_str(text)?;
        let Some(event_type) = frame.get("e").and_then(Value::as_str) else {
            return Ok(Decoded::event(VenueEvent::Unknown(frame)));
        };

        let event = match event_type {
            "tick" => {
                let data = frame.get("data").ok_or(DecodeError::MissingField("data"))?;
                VenueEvent::Ticker(Self::ticker(data)?)
            }
            "order_book" | "md" | "md_update" => VenueEvent::OrderBook(Self::market_frame(&frame)),
            "trade" | "history-update" => VenueEvent::Trade(Self::market_frame(&frame)),
            "pong" => VenueEvent::KeepaliveResponse,
            "ping" => {
                return Ok(Decoded::with_reply(
                    VenueEvent::KeepaliveResponse,
                    json!({"e": "pong"}),
                ))
            }
            "auth" => {
                if frame.get("ok").and_then(Value::as_str) != Some("ok") {
                    warn!(venue = %Venue::Cex, frame = %frame, "Authentication rejected");
                }
                VenueEvent::SubscriptionAck(frame)
            }
            "subscribe" | "connected" => VenueEvent::SubscriptionAck(frame),
            _ => VenueEvent::Unknown(frame),
        };

        Ok(Decoded::event(event))
    }
}
