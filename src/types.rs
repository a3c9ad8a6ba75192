//! Core types used throughout crossarb
//!
//! Venues, canonical instrument symbols, ticks and order sides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported trading venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Cex,
    Gate,
}

impl Venue {
    pub const ALL: [Venue; 3] = [Venue::Binance, Venue::Cex, Venue::Gate];

    /// Stable lowercase identifier used in config, logs and fee tables
    pub fn id(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Cex => "cex",
            Venue::Gate => "gate",
        }
    }

    /// Parse from an identifier, accepting the venues' common spellings
    pub fn from_id(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "cex" | "cexio" | "cex.io" => Some(Venue::Cex),
            "gate" | "gateio" | "gate.io" => Some(Venue::Gate),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Venue-agnostic instrument identity, e.g. `BTCUSDT`.
///
/// Only constructed through [`crate::feed::symbols::canonicalize`], so every
/// value is upper-case and separator-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    /// Canonicalize a venue-native symbol
    pub fn new(native: &str) -> Self {
        crate::feed::symbols::canonicalize(native)
    }

    pub(crate) fn from_normalized(normalized: String) -> Self {
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CanonicalSymbol {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<CanonicalSymbol> for String {
    fn from(symbol: CanonicalSymbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One timestamped price observation for an instrument on a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub venue: Venue,
    pub symbol: CanonicalSymbol,
    /// Last traded price
    pub price: f64,
    /// Best bid (last price when the venue frame carries none)
    pub bid: f64,
    /// Best ask (last price when the venue frame carries none)
    pub ask: f64,
    /// When the tick was decoded locally
    pub observed_at: DateTime<Utc>,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}
