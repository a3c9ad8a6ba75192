//! Binance spot market streams
//!
//! Uses the combined-stream endpoint, so data frames arrive wrapped as
//! `{"stream":"btcusdt@ticker","data":{...}}`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use super::fields;
use super::{Credentials, Decoded, VenueProtocol};
use crate::error::{AdapterError, DecodeError};
use crate::feed::{EventKind, MarketFrame, SubscriptionKind, TickerUpdate, VenueEvent};
use crate::types::Venue;

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";

#[derive(Debug, Clone, Copy, Default)]
pub struct Binance;

impl Binance {
    fn stream_name(kind: SubscriptionKind, symbol: &str) -> String {
        let pair = symbol.to_lowercase();
        match kind {
            SubscriptionKind::Ticker => format!("{}@ticker", pair),
            SubscriptionKind::OrderBook => format!("{}@depth5@100ms", pair),
            SubscriptionKind::Trades => format!("{}@trade", pair),
            SubscriptionKind::Candles => format!("{}@kline_1m", pair),
        }
    }

    fn classify_stream(stream: &str) -> EventKind {
        if stream.contains("@ticker") || stream.contains("@miniTicker") {
            EventKind::Ticker
        } else if stream.contains("@depth") {
            EventKind::OrderBook
        } else if stream.contains("@kline_") {
            EventKind::Candle
        } else if stream.contains("@trade") || stream.contains("@aggTrade") {
            EventKind::Trade
        } else {
            EventKind::Unknown
        }
    }

    fn classify_event_type(event_type: &str) -> EventKind {
        match event_type {
            "24hrTicker" | "24hrMiniTicker" => EventKind::Ticker,
            "depthUpdate" => EventKind::OrderBook,
            "trade" | "aggTrade" => EventKind::Trade,
            "kline" => EventKind::Candle,
            _ => EventKind::Unknown,
        }
    }

    fn ticker(data: &Value, symbol_hint: Option<&str>) -> Result<TickerUpdate, DecodeError> {
        let native_symbol = match data.get("s").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => symbol_hint
                .map(str::to_uppercase)
                .ok_or(DecodeError::MissingField("s"))?,
        };
        let price = fields::number(data, "c")?;

        Ok(TickerUpdate {
            native_symbol,
            price,
            bid: fields::optional_number(data, "b")?.unwrap_or(price),
            ask: fields::optional_number(data, "a")?.unwrap_or(price),
            exchange_ts: data.get("E").and_then(Value::as_i64),
        })
    }

    fn route(
        kind: EventKind,
        data: &Value,
        symbol_hint: Option<&str>,
    ) -> Result<VenueEvent, DecodeError> {
        let frame = || MarketFrame {
            native_symbol: fields::optional_string(data, "s")
                .or_else(|| symbol_hint.map(str::to_uppercase)),
            data: data.clone(),
        };

        Ok(match kind {
            EventKind::Ticker => VenueEvent::Ticker(Self::ticker(data, symbol_hint)?),
            EventKind::OrderBook => VenueEvent::OrderBook(frame()),
            EventKind::Trade => VenueEvent::Trade(frame()),
            EventKind::Candle => VenueEvent::Candle(frame()),
            _ => VenueEvent::Unknown(data.clone()),
        })
    }
}

impl VenueProtocol for Binance {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn default_url(&self) -> &'static str {
        BINANCE_WS_URL
    }

    fn supports_auth(&self) -> bool {
        false
    }

    fn auth_frame(
        &self,
        _credentials: &Credentials,
        _now: DateTime<Utc>,
    ) -> Result<Option<Value>, AdapterError> {
        Ok(None)
    }

    fn subscribe_frames(
        &self,
        kind: SubscriptionKind,
        instruments: &[String],
        request_id: u64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Value>, AdapterError> {
        let streams: Vec<String> = instruments
            .iter()
            .map(|symbol| Self::stream_name(kind, symbol))
            .collect();

        Ok(vec![json!({
            "method": "SUBSCRIBE",
            "params": streams,
            "id": request_id,
        })])
    }

    fn ping(&self, _now: DateTime<Utc>) -> Message {
        Message::Ping(Vec::new())
    }

    fn decode(&self, text: &str) -> Result<Decoded, DecodeError> {
        let frame: Value = serde_json::from_str(text)?;

        if let Some(stream) = frame.get("stream").and_then(Value::as_str) {
            let data = frame.get("data").ok_or(DecodeError::MissingField("data"))?;
            let symbol_hint = stream.split('@').next();
            return Self::route(Self::classify_stream(stream), data, symbol_hint)
                .map(Decoded::event);
        }

        if let Some(event_type) = frame.get("e").and_then(Value::as_str) {
            return Self::route(Self::classify_event_type(event_type), &frame, None)
                .map(Decoded::event);
        }

        if frame.get("pong").is_some() {
            return Ok(Decoded::event(VenueEvent::KeepaliveResponse));
        }

        if frame.get("result").is_some() && frame.get("id").is_some() {
            return Ok(Decoded::event(VenueEvent::SubscriptionAck(frame)));
        }

        Ok(Decoded::event(VenueEvent::Unknown(frame)))
    }
}
