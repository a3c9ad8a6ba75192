//! Canonical price table: latest tick per (symbol, venue)

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{CanonicalSymbol, Tick, Venue};

/// Latest tick per venue for one symbol
pub type VenueQuotes = BTreeMap<Venue, Tick>;

/// Point-in-time copy of the whole table
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    /// Number of writes applied when the snapshot was taken
    pub version: u64,
    pub symbols: BTreeMap<CanonicalSymbol, VenueQuotes>,
}

impl PriceSnapshot {
    pub fn quotes(&self, symbol: &CanonicalSymbol) -> Option<&VenueQuotes> {
        self.symbols.get(symbol)
    }

    pub fn get(&self, symbol: &CanonicalSymbol, venue: Venue) -> Option<&Tick> {
        self.symbols.get(symbol).and_then(|quotes| quotes.get(&venue))
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Shared price table.
///
/// Only the feed aggregator writes; readers take copies so a scan never
/// observes a half-applied update.
#[derive(Debug, Default)]
pub struct PriceTable {
    inner: RwLock<PriceSnapshot>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tick, replacing any earlier tick for the same (symbol, venue).
    /// Returns the table version after the write.
    pub fn apply(&self, tick: Tick) -> u64 {
        self.apply_and_publish(tick, |_| {})
    }

    /// Store a tick and hand it to `publish` while the write guard is still
    /// held, so subscribers see ticks in the order they were applied.
    pub fn apply_and_publish<F>(&self, tick: Tick, publish: F) -> u64
    where
        F: FnOnce(&Tick),
    {
        let mut table = self.write();
        table.version += 1;
        let version = table.version;

        let venue = tick.venue;
        let quotes = table.symbols.entry(tick.symbol.clone()).or_default();
        quotes.insert(venue, tick);
        publish(&quotes[&venue]);

        version
    }

    pub fn get(&self, symbol: &CanonicalSymbol, venue: Venue) -> Option<Tick> {
        self.read().get(symbol, venue).cloned()
    }

    /// Copy of every venue's latest tick for one symbol
    pub fn quotes(&self, symbol: &CanonicalSymbol) -> VenueQuotes {
        self.read().quotes(symbol).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> PriceSnapshot {
        self.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn symbol_count(&self) -> usize {
        self.read().symbols.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, PriceSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PriceSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
