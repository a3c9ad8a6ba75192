//! Feed module - Multi-venue market data ingestion
//!
//! Streams quotes from Binance, CEX.IO and Gate.io over WebSocket,
//! normalizes symbols, and keeps one canonical price table that the
//! arbitrage detector reads.

mod aggregator;
mod price_table;
pub mod symbols;
pub mod venues;

pub use aggregator::{
    ConnectReport, FeedAggregator, ReconnectPolicy, SubscribeReport, SubscriptionRequest,
    VenueRunOutcome, VenueRunReport,
};
pub use price_table::{PriceSnapshot, PriceTable, VenueQuotes};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::types::{Tick, Venue};

/// Market data a venue can be subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Ticker,
    OrderBook,
    Trades,
    Candles,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Ticker => write!(f, "ticker"),
            SubscriptionKind::OrderBook => write!(f, "order_book"),
            SubscriptionKind::Trades => write!(f, "trades"),
            SubscriptionKind::Candles => write!(f, "candles"),
        }
    }
}

/// Classification tag carried by every decoded venue frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ticker,
    OrderBook,
    Trade,
    Candle,
    KeepaliveResponse,
    SubscriptionAck,
    Unknown,
}

/// Ticker payload in venue-native terms
#[derive(Debug, Clone, PartialEq)]
pub struct TickerUpdate {
    pub native_symbol: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    /// Venue event time in milliseconds, when the frame carries one
    pub exchange_ts: Option<i64>,
}

impl TickerUpdate {
    pub fn into_tick(self, venue: Venue, observed_at: DateTime<Utc>) -> Tick {
        Tick {
            venue,
            symbol: symbols::canonicalize(&self.native_symbol),
            price: self.price,
            bid: self.bid,
            ask: self.ask,
            observed_at,
        }
    }
}

/// Non-ticker market data, kept as raw JSON
#[derive(Debug, Clone, PartialEq)]
pub struct MarketFrame {
    pub native_symbol: Option<String>,
    pub data: Value,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum VenueEvent {
    Ticker(TickerUpdate),
    OrderBook(MarketFrame),
    Trade(MarketFrame),
    Candle(MarketFrame),
    KeepaliveResponse,
    SubscriptionAck(Value),
    Unknown(Value),
}

impl VenueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VenueEvent::Ticker(_) => EventKind::Ticker,
            VenueEvent::OrderBook(_) => EventKind::OrderBook,
            VenueEvent::Trade(_) => EventKind::Trade,
            VenueEvent::Candle(_) => EventKind::Candle,
            VenueEvent::KeepaliveResponse => EventKind::KeepaliveResponse,
            VenueEvent::SubscriptionAck(_) => EventKind::SubscriptionAck,
            VenueEvent::Unknown(_) => EventKind::Unknown,
        }
    }
}
