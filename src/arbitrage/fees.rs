//! Trading fee tables
//!
//! Fee reports arrive in several shapes (keyed by symbol, a list of
//! commission records, or an error); they are normalized into one
//! [`FeeTable`] here so the detector only ever sees
//! venue -> symbol -> rate.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{info, warn};

use crate::types::{CanonicalSymbol, Venue};

/// Taker fee applied when a venue publishes no rate for a symbol
pub const DEFAULT_TAKER_FEE: f64 = 0.001;

fn default_fee() -> f64 {
    DEFAULT_TAKER_FEE
}

/// Accept fee rates sent as JSON numbers or strings
fn flexible_rate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Maker/taker rates as fractions (0.001 = 0.1%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRate {
    #[serde(default = "default_fee", deserialize_with = "flexible_rate")]
    pub maker: f64,
    #[serde(default = "default_fee", deserialize_with = "flexible_rate")]
    pub taker: f64,
}

impl FeeRate {
    pub fn new(maker: f64, taker: f64) -> Self {
        Self { maker, taker }
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self::new(DEFAULT_TAKER_FEE, DEFAULT_TAKER_FEE)
    }
}

/// One entry of a commission-record list (Binance trade-fee style)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub symbol: String,
    #[serde(
        rename = "makerCommission",
        default = "default_fee",
        deserialize_with = "flexible_rate"
    )]
    pub maker_commission: f64,
    #[serde(
        rename = "takerCommission",
        default = "default_fee",
        deserialize_with = "flexible_rate"
    )]
    pub taker_commission: f64,
}

/// Fee report for one venue as delivered by a fee source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VenueFeeReport {
    Records(Vec<FeeRecord>),
    Unavailable { error: String },
    Keyed(HashMap<String, FeeRate>),
}

/// venue -> canonical symbol -> rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeTable {
    rates: HashMap<Venue, HashMap<CanonicalSymbol, FeeRate>>,
}

impl FeeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate; `symbol` may be in any venue-native form
    pub fn insert(&mut self, venue: Venue, symbol: &str, rate: FeeRate) {
        self.rates
            .entry(venue)
            .or_default()
            .insert(CanonicalSymbol::new(symbol), rate);
    }

    /// Normalize per-venue reports into one table. Unavailable reports are
    /// logged and leave that venue on default fees.
    pub fn from_reports<I>(reports: I) -> Self
    where
        I: IntoIterator<Item = (Venue, VenueFeeReport)>,
    {
        let mut table = Self::new();
        for (venue, report) in reports {
            match report {
                VenueFeeReport::Keyed(rates) => {
                    for (symbol, rate) in rates {
                        table.insert(venue, &symbol, rate);
                    }
                }
                VenueFeeReport::Records(records) => {
                    for record in records {
                        table.insert(
                            venue,
                            &record.symbol,
                            FeeRate::new(record.maker_commission, record.taker_commission),
                        );
                    }
                }
                VenueFeeReport::Unavailable { error } => {
                    warn!(
                        venue = %venue,
                        error = %error,
                        "Fee report unavailable; using default fees"
                    );
                }
            }
        }
        table
    }

    pub fn rate(&self, venue: Venue, symbol: &CanonicalSymbol) -> Option<FeeRate> {
        self.rates.get(&venue).and_then(|m| m.get(symbol)).copied()
    }

    /// Taker fee, falling back to [`DEFAULT_TAKER_FEE`]
    pub fn taker_fee(&self, venue: Venue, symbol: &CanonicalSymbol) -> f64 {
        self.rate(venue, symbol)
            .map(|r| r.taker)
            .unwrap_or(DEFAULT_TAKER_FEE)
    }

    pub fn len(&self) -> usize {
        self.rates.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Supplies raw fee reports for every venue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn get_all_fees(&self) -> HashMap<Venue, VenueFeeReport>;
}

/// Fee source backed by fixed reports, e.g. from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFeeSource {
    reports: HashMap<Venue, VenueFeeReport>,
}

impl StaticFeeSource {
    pub fn new(reports: HashMap<Venue, VenueFeeReport>) -> Self {
        Self { reports }
    }

    /// Build from `venue id -> symbol -> rate`; unknown venue ids are skipped
    pub fn from_config(fees: &HashMap<String, HashMap<String, FeeRate>>) -> Self {
        let mut reports = HashMap::new();
        for (id, rates) in fees {
            match Venue::from_id(id) {
                Some(venue) => {
                    reports.insert(venue, VenueFeeReport::Keyed(rates.clone()));
                }
                None => warn!(venue = %id, "Ignoring fees for unknown venue"),
            }
        }
        Self { reports }
    }
}

#[async_trait]
impl FeeSource for StaticFeeSource {
    async fn get_all_fees(&self) -> HashMap<Venue, VenueFeeReport> {
        self.reports.clone()
    }
}

/// Shared, refreshable fee table
#[derive(Debug, Default)]
pub struct FeeBook {
    table: RwLock<FeeTable>,
}

impl FeeBook {
    pub fn new(table: FeeTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Swap in a new table wholesale
    pub fn replace(&self, table: FeeTable) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    /// Pull reports from `source` and replace the table. Returns the number of rates loaded.
    pub async fn refresh(&self, source: &dyn FeeSource) -> usize {
        let table = FeeTable::from_reports(source.get_all_fees().await);
        let loaded = table.len();
        self.replace(table);
        info!(rates = loaded, "Fee table refreshed");
        loaded
    }

    pub fn taker_fee(&self, venue: Venue, symbol: &CanonicalSymbol) -> f64 {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .taker_fee(venue, symbol)
    }
}
