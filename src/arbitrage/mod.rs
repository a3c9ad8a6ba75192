//! Arbitrage module - Fee-aware cross-venue opportunity detection

mod detector;
pub mod fees;

pub use detector::{calculate_profit, ArbitrageDetector};
pub use fees::{
    FeeBook, FeeRate, FeeRecord, FeeSource, FeeTable, StaticFeeSource, VenueFeeReport,
    DEFAULT_TAKER_FEE,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{CanonicalSymbol, Venue};

/// A fee-adjusted profitable buy/sell venue pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub symbol: CanonicalSymbol,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub buy_price: f64,
    pub sell_price: f64,
    pub buy_fee: f64,
    pub sell_fee: f64,
    /// Per-unit profit after fees, in quote currency
    pub net_profit: f64,
    /// `net_profit / buy_price`
    pub profit_fraction: f64,
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buy {}@{} sell {}@{} ({:.4}%)",
            self.symbol,
            self.buy_venue,
            self.buy_price,
            self.sell_venue,
            self.sell_price,
            self.profit_fraction * 100.0
        )
    }
}
