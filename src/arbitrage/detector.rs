//! Arbitrage detector
//!
//! For every symbol quoted on two or more venues, evaluates each ordered
//! (buy venue, sell venue) pair:
//!
//! ```text
//! cost    = buy_price  * (1 + taker_fee(buy_venue))
//! revenue = sell_price * (1 - taker_fee(sell_venue))
//! profit  = (revenue - cost) / buy_price
//! ```
//!
//! and reports pairs whose profit fraction reaches the threshold.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fees::FeeBook;
use super::Opportunity;
use crate::feed::{PriceSnapshot, PriceTable, VenueQuotes};
use crate::types::{CanonicalSymbol, Tick};

/// Per-unit net profit of buying at `buy_price` and selling at `sell_price`
pub fn calculate_profit(buy_price: f64, sell_price: f64, buy_fee: f64, sell_fee: f64) -> f64 {
    let cost = buy_price * (1.0 + buy_fee);
    let revenue = sell_price * (1.0 - sell_fee);
    revenue - cost
}

pub struct ArbitrageDetector {
    fees: Arc<FeeBook>,
    min_profit_threshold: f64,
}

impl ArbitrageDetector {
    pub fn new(fees: Arc<FeeBook>, min_profit_threshold: f64) -> Self {
        Self {
            fees,
            min_profit_threshold,
        }
    }

    pub fn min_profit_threshold(&self) -> f64 {
        self.min_profit_threshold
    }

    /// Evaluate buying on `buy`'s venue and selling on `sell`'s venue
    pub fn evaluate(
        &self,
        symbol: &CanonicalSymbol,
        buy: &Tick,
        sell: &Tick,
    ) -> Option<Opportunity> {
        if buy.venue == sell.venue || buy.price <= 0.0 {
            return None;
        }

        let buy_fee = self.fees.taker_fee(buy.venue, symbol);
        let sell_fee = self.fees.taker_fee(sell.venue, symbol);
        let net_profit = calculate_profit(buy.price, sell.price, buy_fee, sell_fee);
        let profit_fraction = net_profit / buy.price;

        if profit_fraction < self.min_profit_threshold {
            return None;
        }

        Some(Opportunity {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            buy_venue: buy.venue,
            sell_venue: sell.venue,
            buy_price: buy.price,
            sell_price: sell.price,
            buy_fee,
            sell_fee,
            net_profit,
            profit_fraction,
            detected_at: Utc::now(),
        })
    }

    /// Every qualifying ordered venue pair for one symbol
    pub fn scan_symbol(&self, symbol: &CanonicalSymbol, quotes: &VenueQuotes) -> Vec<Opportunity> {
        if quotes.len() < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        for buy in quotes.values() {
            for sell in quotes.values() {
                if let Some(opportunity) = self.evaluate(symbol, buy, sell) {
                    found.push(opportunity);
                }
            }
        }
        found
    }

    /// Scan a whole-table snapshot
    pub fn scan(&self, snapshot: &PriceSnapshot) -> Vec<Opportunity> {
        snapshot
            .symbols
            .iter()
            .flat_map(|(symbol, quotes)| self.scan_symbol(symbol, quotes))
            .collect()
    }

    /// Re-scan the updated symbol on every published tick and forward
    /// opportunities to `sink`. Returns when the tick stream closes or the
    /// sink is dropped.
    pub async fn run(
        &self,
        mut ticks: broadcast::Receiver<Tick>,
        table: Arc<PriceTable>,
        sink: mpsc::Sender<Opportunity>,
    ) {
        info!(threshold = self.min_profit_threshold, "Arbitrage detector started");
        loop {
            let found = match ticks.recv().await {
                Ok(tick) => self.scan_symbol(&tick.symbol, &table.quotes(&tick.symbol)),
                Err(RecvError::Lagged(skipped)) => {
                    // Skipped ticks may belong to any symbol
                    warn!(skipped, "Detector lagging behind tick stream; rescanning table");
                    self.scan(&table.snapshot())
                }
                Err(RecvError::Closed) => {
                    debug!("Tick stream closed");
                    break;
                }
            };

            if !Self::forward(found, &sink).await {
                debug!("Opportunity sink closed");
                return;
            }
        }
    }

    /// Returns false once the sink is gone
    async fn forward(found: Vec<Opportunity>, sink: &mpsc::Sender<Opportunity>) -> bool {
        for opportunity in found {
            info!(
                symbol = %opportunity.symbol,
                buy_venue = %opportunity.buy_venue,
                sell_venue = %opportunity.sell_venue,
                profit_pct = opportunity.profit_fraction * 100.0,
                "Arbitrage opportunity"
            );
            if sink.send(opportunity).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::fees::{FeeRate, FeeTable, DEFAULT_TAKER_FEE};
    use crate::types::Venue;

    fn make_tick(venue: Venue, price: f64) -> Tick {
        Tick {
            venue,
            symbol: CanonicalSymbol::new("BTCUSDT"),
            price,
            bid: price,
            ask: price,
            observed_at: Utc::now(),
        }
    }

    fn uniform_fees(fee: f64) -> Arc<FeeBook> {
        let mut table = FeeTable::new();
        for venue in Venue::ALL {
            table.insert(venue, "BTCUSDT", FeeRate::new(fee, fee));
        }
        Arc::new(FeeBook::new(table))
    }

    fn btc_table() -> PriceTable {
        let table = PriceTable::new();
        table.apply(make_tick(Venue::Binance, 60000.0));
        table.apply(make_tick(Venue::Cex, 60200.0));
        table.apply(make_tick(Venue::Gate, 60100.0));
        table
    }

    #[test]
    fn test_calculate_profit() {
        let profit = calculate_profit(60000.0, 60200.0, 0.001, 0.001);
        // 60200 * 0.999 - 60000 * 1.001
        assert!((profit - 79.8).abs() < 1e-6, "got {}", profit);
    }

    #[test]
    fn test_reports_binance_to_cex_at_low_threshold() {
        let detector = ArbitrageDetector::new(uniform_fees(0.001), 0.001);
        let opportunities = detector.scan(&btc_table().snapshot());

        let best = opportunities
            .iter()
            .find(|o| o.buy_venue == Venue::Binance && o.sell_venue == Venue::Cex)
            .expect("binance -> cex should qualify");
        assert_eq!(best.buy_price, 60000.0);
        assert_eq!(best.sell_price, 60200.0);
        assert!((best.profit_fraction - 79.8 / 60000.0).abs() < 1e-12);

        // Only buy-low/sell-high directions can clear fees
        assert!(opportunities.iter().all(|o| o.sell_price > o.buy_price));
    }

    #[test]
    fn test_nothing_reported_at_high_threshold() {
        let detector = ArbitrageDetector::new(uniform_fees(0.001), 0.1);
        let opportunities = detector.scan(&btc_table().snapshot());
        assert!(!opportunities
            .iter()
            .any(|o| o.buy_venue == Venue::Binance && o.sell_venue == Venue::Cex));
        assert!(opportunities.is_empty());
    }

    #[test]
    fn test_both_directions_are_evaluated() {
        let detector = ArbitrageDetector::new(uniform_fees(0.0), -1.0);
        let table = PriceTable::new();
        table.apply(make_tick(Venue::Binance, 100.0));
        table.apply(make_tick(Venue::Gate, 101.0));

        let opportunities = detector.scan(&table.snapshot());
        assert_eq!(opportunities.len(), 2);
        assert_ne!(opportunities[0].id, opportunities[1].id);
    }

    #[test]
    fn test_missing_fee_uses_default() {
        let detector = ArbitrageDetector::new(Arc::new(FeeBook::default()), 0.0);
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let opportunity = detector
            .evaluate(&symbol, &make_tick(Venue::Binance, 60000.0), &make_tick(Venue::Cex, 60200.0))
            .unwrap();
        assert_eq!(opportunity.buy_fee, DEFAULT_TAKER_FEE);
        assert_eq!(opportunity.sell_fee, DEFAULT_TAKER_FEE);
    }

    #[test]
    fn test_degenerate_pairs_are_skipped() {
        let detector = ArbitrageDetector::new(uniform_fees(0.0), -1.0);
        let symbol = CanonicalSymbol::new("BTCUSDT");
        let tick = make_tick(Venue::Binance, 100.0);
        assert!(detector.evaluate(&symbol, &tick, &tick).is_none());
        assert!(detector
            .evaluate(&symbol, &make_tick(Venue::Gate, 0.0), &tick)
            .is_none());

        let mut single = VenueQuotes::new();
        single.insert(Venue::Binance, tick);
        assert!(detector.scan_symbol(&symbol, &single).is_empty());
    }

    #[tokio::test]
    async fn test_run_forwards_opportunities_for_updated_symbol() {
        let table = Arc::new(PriceTable::new());
        let (tick_tx, tick_rx) = broadcast::channel(16);
        let (sink_tx, mut sink_rx) = mpsc::channel(16);

        let detector = ArbitrageDetector::new(uniform_fees(0.001), 0.001);
        let run_table = Arc::clone(&table);
        let handle = tokio::spawn(async move { detector.run(tick_rx, run_table, sink_tx).await });

        for tick in [make_tick(Venue::Binance, 60000.0), make_tick(Venue::Cex, 60200.0)] {
            table.apply_and_publish(tick, |t| {
                tick_tx.send(t.clone()).unwrap();
            });
        }

        let opportunity = sink_rx.recv().await.unwrap();
        assert_eq!(opportunity.buy_venue, Venue::Binance);
        assert_eq!(opportunity.sell_venue, Venue::Cex);

        drop(tick_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_rescans_table_after_lagging() {
        let table = Arc::new(PriceTable::new());
        let (tick_tx, tick_rx) = broadcast::channel(1);
        let (sink_tx, mut sink_rx) = mpsc::channel(16);

        // Publish before the detector polls so the BTC ticks are overwritten
        let eth = Tick {
            symbol: CanonicalSymbol::new("ETHUSDT"),
            ..make_tick(Venue::Gate, 3000.0)
        };
        for tick in [make_tick(Venue::Binance, 60000.0), make_tick(Venue::Cex, 60200.0), eth] {
            table.apply_and_publish(tick, |t| {
                tick_tx.send(t.clone()).unwrap();
            });
        }

        let detector = ArbitrageDetector::new(uniform_fees(0.001), 0.001);
        let run_table = Arc::clone(&table);
        let handle = tokio::spawn(async move { detector.run(tick_rx, run_table, sink_tx).await });

        let opportunity = sink_rx.recv().await.unwrap();
        assert_eq!(opportunity.symbol.as_str(), "BTCUSDT");
        assert_eq!(opportunity.buy_venue, Venue::Binance);
        assert_eq!(opportunity.sell_venue, Venue::Cex);

        drop(tick_tx);
        handle.await.unwrap();
        assert!(sink_rx.recv().await.is_none());
    }
}
