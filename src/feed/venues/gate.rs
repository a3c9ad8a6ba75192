//! Gate.io spot WebSocket v4
//!
//! Frames are addressed by `channel` + `event`; pairs are written `BTC_USDT`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use super::fields;
use super::{Credentials, Decoded, VenueProtocol};
use crate::error::{AdapterError, DecodeError};
use crate::feed::{MarketFrame, SubscriptionKind, TickerUpdate, VenueEvent};
use crate::types::Venue;

pub const GATE_WS_URL: &str = "wss://api.gateio.ws/ws/v4/";

const PING_CHANNEL: &str = "spot.ping";
const PONG_CHANNEL: &str = "spot.pong";

#[derive(Debug, Clone, Copy, Default)]
pub struct Gate;

impl Gate {
    fn channel(kind: SubscriptionKind) -> &'static str {
        match kind {
            SubscriptionKind::Ticker => "spot.tickers",
            SubscriptionKind::OrderBook => "spot.order_book",
            SubscriptionKind::Trades => "spot.trades",
            SubscriptionKind::Candles => "spot.candlesticks",
        }
    }

    /// Non-null `error` of a response frame
    fn rejection(frame: &Value) -> Option<&Value> {
        frame.get("error").filter(|e| !e.is_null())
    }

    fn payload(kind: SubscriptionKind, pair: &str) -> Value {
        match kind {
            SubscriptionKind::Ticker | SubscriptionKind::Trades => json!([pair]),
            SubscriptionKind::OrderBook => json!([pair, "5", "100ms"]),
            SubscriptionKind::Candles => json!(["1m", pair]),
        }
    }

    fn ticker(result: &Value) -> Result<TickerUpdate, DecodeError> {
        let native_symbol = fields::string(result, "currency_pair")?.to_string();
        let price = fields::number(result, "last")?;

        Ok(TickerUpdate {
            native_symbol,
            price,
            bid: fields::optional_number(result, "highest_bid")?.unwrap_or(price),
            ask: fields::optional_number(result, "lowest_ask")?.unwrap_or(price),
            exchange_ts: None,
        })
    }

    fn market_frame(result: &Value) -> MarketFrame {
        let native_symbol = fields::optional_string(result, "currency_pair")
            .or_else(|| fields::optional_string(result, "s"))
            .or_else(|| {
                // candlestick name is "<interval>_<pair>", e.g. "1m_BTC_USDT"
                fields::optional_string(result, "n")
                    .and_then(|n| n.split_once('_').map(|(_, pair)| pair.to_string()))
            });
        MarketFrame {
            native_symbol,
            data: result.clone(),
        }
    }
}

impl VenueProtocol for Gate {
    fn venue(&self) -> Venue {
        Venue::Gate
    }

    fn default_url(&self) -> &'static str {
        GATE_WS_URL
    }

    fn supports_auth(&self) -> bool {
        true
    }

    fn auth_frame(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, AdapterError> {
        let time = now.timestamp();
        let message = format!("GET\n/realtime\n\n{}", time);
        let sign = credentials
            .sign_sha512_hex(&message)
            .map_err(|e| AdapterError::Auth {
                venue: Venue::Gate,
                reason: e.to_string(),
            })?;

        Ok(Some(json!({
            "time": time,
            "channel": PING_CHANNEL,
            "event": "subscribe",
            "auth": {
                "method": "api_key",
                "KEY": credentials.api_key,
                "SIGN": sign,
            }
        })))
    }

    fn subscribe_frames(
        &self,
        kind: SubscriptionKind,
        instruments: &[String],
        _request_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Value>, AdapterError> {
        let time = now.timestamp();
        Ok(instruments
            .iter()
            .map(|pair| {
                json!({
                    "time": time,
                    "channel": Self::channel(kind),
                    "event": "subscribe",
                    "payload": Self::payload(kind, pair),
                })
            })
            .collect())
    }

    fn ping(&self, now: DateTime<Utc>) -> Message {
        Message::Text(json!({"time": now.timestamp(), "channel": PING_CHANNEL}).to_string())
    }

    fn decode(&self, text: &str) -> Result<Decoded, DecodeError> {
        let frame: Value = serde_json::from_str(text)?;
        let Some(channel) = frame.get("channel").and_then(Value::as_str) else {
            return Ok(Decoded::event(VenueEvent::Unknown(frame)));
        };

        let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();

        if channel == PING_CHANNEL || channel == PONG_CHANNEL {
            // The auth frame rides on spot.ping; its reply carries event "subscribe"
            if event == "subscribe" {
                if let Some(error) = Self::rejection(&frame) {
                    warn!(venue = %Venue::Gate, error = %error, "Authentication rejected");
                }
                return Ok(Decoded::event(VenueEvent::SubscriptionAck(frame)));
            }
            return Ok(Decoded::event(VenueEvent::KeepaliveResponse));
        }

        if event == "subscribe" || event == "unsubscribe" {
            if let Some(error) = Self::rejection(&frame) {
                warn!(venue = %Venue::Gate, error = %error, "Subscription rejected");
            }
            return Ok(Decoded::event(VenueEvent::SubscriptionAck(frame)));
        }

        let result = || frame.get("result").ok_or(DecodeError::MissingField("result"));
        let event = match channel {
            "spot.tickers" => VenueEvent::Ticker(Self::ticker(result()?)?),
            "spot.order_book" | "spot.order_book_update" => {
                VenueEvent::OrderBook(Self::market_frame(result()?))
            }
            "spot.trades" => VenueEvent::Trade(Self::market_frame(result()?)),
            "spot.candlesticks" => VenueEvent::Candle(Self::market_frame(result()?)),
            _ => VenueEvent::Unknown(frame.clone()),
        };

        Ok(Decoded::event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::EventKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_subscribe_frames_per_kind() {
        let pairs = ["BTC_USDT".to_string()];

        let frames = Gate
            .subscribe_frames(SubscriptionKind::Ticker, &pairs, 1, at(1_700_000_000))
            .unwrap();
        assert_eq!(
            frames,
            vec![json!({
                "time": 1_700_000_000,
                "channel": "spot.tickers",
                "event": "subscribe",
                "payload": ["BTC_USDT"],
            })]
        );

        let frames = Gate
            .subscribe_frames(SubscriptionKind::OrderBook, &pairs, 1, at(0))
            .unwrap();
        assert_eq!(frames[0]["payload"], json!(["BTC_USDT", "5", "100ms"]));

        let frames = Gate
            .subscribe_frames(SubscriptionKind::Candles, &pairs, 1, at(0))
            .unwrap();
        assert_eq!(frames[0]["channel"], "spot.candlesticks");
        assert_eq!(frames[0]["payload"], json!(["1m", "BTC_USDT"]));
    }

    #[test]
    fn test_auth_frame_signs_realtime_path() {
        let creds = Credentials::new("gate-key", "gate-secret");
        let frame = Gate.auth_frame(&creds, at(1_700_000_000)).unwrap().unwrap();

        assert_eq!(frame["channel"], "spot.ping");
        assert_eq!(frame["auth"]["method"], "api_key");
        assert_eq!(frame["auth"]["KEY"], "gate-key");
        let expected = creds.sign_sha512_hex("GET\n/realtime\n\n1700000000").unwrap();
        assert_eq!(frame["auth"]["SIGN"], expected);
        assert_eq!(expected.len(), 128);
    }

    #[test]
    fn test_decode_ticker_update() {
        let text = r#"{"time":1700000000,"channel":"spot.tickers","event":"update","result":{"currency_pair":"BTC_USDT","last":"60100","highest_bid":"60099.5","lowest_ask":"60100.5"}}"#;
        match Gate.decode(text).unwrap().event {
            VenueEvent::Ticker(update) => {
                assert_eq!(update.native_symbol, "BTC_USDT");
                assert_eq!(update.price, 60100.0);
                assert_eq!(update.bid, 60099.5);
                assert_eq!(update.ask, 60100.5);
            }
            other => panic!("expected ticker, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_response_is_ack() {
        let text = r#"{"time":1,"channel":"spot.tickers","event":"subscribe","result":{"status":"success"}}"#;
        assert_eq!(Gate.decode(text).unwrap().event.kind(), EventKind::SubscriptionAck);
    }

    #[test]
    fn test_pong_and_unknown_channels() {
        let kind = |text: &str| Gate.decode(text).unwrap().event.kind();
        assert_eq!(
            kind(r#"{"time":1,"channel":"spot.pong","event":"","result":null}"#),
            EventKind::KeepaliveResponse
        );
        assert_eq!(
            kind(r#"{"time":1,"channel":"spot.balances","event":"update","result":{}}"#),
            EventKind::Unknown
        );
        assert_eq!(kind(r#"{"id":1}"#), EventKind::Unknown);
    }

    #[test]
    fn test_auth_reply_on_ping_channel_is_ack() {
        let accepted = r#"{"time":1,"channel":"spot.ping","event":"subscribe","error":null,"result":{"status":"success"}}"#;
        let rejected = r#"{"time":1,"channel":"spot.ping","event":"subscribe","error":{"code":2,"message":"invalid key"},"result":null}"#;

        for text in [accepted, rejected] {
            let event = Gate.decode(text).unwrap().event;
            assert_eq!(event.kind(), EventKind::SubscriptionAck);
        }

        let frame: Value = serde_json::from_str(accepted).unwrap();
        assert!(Gate::rejection(&frame).is_none());
        let frame: Value = serde_json::from_str(rejected).unwrap();
        assert_eq!(Gate::rejection(&frame).unwrap()["message"], "invalid key");

        // Plain ping replies stay keepalives
        let pong = r#"{"time":1,"channel":"spot.ping","event":"","result":null}"#;
        assert_eq!(
            Gate.decode(pong).unwrap().event.kind(),
            EventKind::KeepaliveResponse
        );
    }

    #[test]
    fn test_candle_symbol_from_name() {
        let text = r#"{"channel":"spot.candlesticks","event":"update","result":{"t":"1","c":"1","n":"1m_BTC_USDT"}}"#;
        match Gate.decode(text).unwrap().event {
            VenueEvent::Candle(frame) => {
                assert_eq!(frame.native_symbol.as_deref(), Some("BTC_USDT"))
            }
            other => panic!("expected candle, got {:?}", other),
        }
    }

    #[test]
    fn test_update_without_result_is_malformed() {
        assert!(matches!(
            Gate.decode(r#"{"channel":"spot.tickers","event":"update"}"#),
            Err(DecodeError::MissingField("result"))
        ));
    }

    #[test]
    fn test_ping_is_text_frame() {
        match Gate.ping(at(5)) {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame, json!({"time": 5, "channel": "spot.ping"}));
            }
            other => panic!("expected text ping, got {:?}", other),
        }
    }
}
