//! Feed aggregator - owns the venue adapters and the price table
//!
//! Fans subscription requests out to every venue concurrently, then runs one
//! task per venue that applies its ticks to the shared [`PriceTable`] and
//! republishes them on a broadcast channel.

use chrono::Utc;
use futures_util::future::join_all;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use super::price_table::PriceTable;
use super::symbols;
use super::venues::{AdapterState, SubscriptionAck, VenueAdapter};
use super::{SubscriptionKind, VenueEvent};
use crate::error::AdapterError;
use crate::types::{CanonicalSymbol, Tick, Venue};

/// Canonical symbol -> venues it should be streamed from
pub type SubscriptionRequest = BTreeMap<CanonicalSymbol, BTreeSet<Venue>>;

const DEFAULT_TICK_BUFFER: usize = 1024;
const BACKOFF_JITTER_RATIO: f64 = 0.20;

/// Outcome of connecting one venue
#[derive(Debug)]
pub struct ConnectReport {
    pub venue: Venue,
    pub result: Result<(), AdapterError>,
}

impl ConnectReport {
    pub fn connected(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of subscribing one venue
#[derive(Debug)]
pub struct SubscribeReport {
    pub venue: Venue,
    pub result: Result<SubscriptionAck, AdapterError>,
}

#[derive(Debug)]
pub enum VenueRunOutcome {
    /// Shutdown was requested
    Stopped,
    /// Reconnect attempts exhausted
    Failed(AdapterError),
}

/// Summary of one venue task after `run` returns
#[derive(Debug)]
pub struct VenueRunReport {
    pub venue: Venue,
    pub ticks_applied: u64,
    pub reconnects: u32,
    pub outcome: VenueRunOutcome,
}

/// Exponential backoff with jitter between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts per outage before the venue is given up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): base * 2^(attempt-1), capped, +/-20%
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let bounded = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter = 1.0
            + rand::thread_rng().gen_range(-BACKOFF_JITTER_RATIO..=BACKOFF_JITTER_RATIO);
        bounded.mul_f64(jitter).min(self.max_delay)
    }
}

struct VenueSlot {
    adapter: Box<dyn VenueAdapter>,
    /// Subscriptions to re-issue after a reconnect, one entry per kind
    subscriptions: Vec<(SubscriptionKind, Vec<String>)>,
}

impl VenueSlot {
    /// Merge `instruments` into the remembered subscription for `kind`
    fn remember(&mut self, kind: SubscriptionKind, instruments: &[String]) {
        let index = match self.subscriptions.iter().position(|(k, _)| *k == kind) {
            Some(index) => index,
            None => {
                self.subscriptions.push((kind, Vec::new()));
                self.subscriptions.len() - 1
            }
        };
        let known = &mut self.subscriptions[index].1;
        for instrument in instruments {
            if !known.contains(instrument) {
                known.push(instrument.clone());
            }
        }
    }
}

pub struct FeedAggregator {
    slots: Vec<VenueSlot>,
    table: Arc<PriceTable>,
    tick_tx: broadcast::Sender<Tick>,
    reconnect: ReconnectPolicy,
}

impl FeedAggregator {
    pub fn new(table: Arc<PriceTable>, tick_buffer: usize) -> Self {
        let (tick_tx, _) = broadcast::channel(tick_buffer.max(1));
        Self {
            slots: Vec::new(),
            table,
            tick_tx,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Register an adapter; a second adapter for the same venue replaces the first
    pub fn add_adapter(&mut self, adapter: Box<dyn VenueAdapter>) {
        let venue = adapter.venue();
        let slot = VenueSlot {
            adapter,
            subscriptions: Vec::new(),
        };
        match self.slots.iter_mut().find(|s| s.adapter.venue() == venue) {
            Some(existing) => {
                warn!(venue = %venue, "Replacing existing adapter");
                *existing = slot;
            }
            None => self.slots.push(slot),
        }
    }

    pub fn venues(&self) -> Vec<Venue> {
        self.slots.iter().map(|s| s.adapter.venue()).collect()
    }

    pub fn state(&self, venue: Venue) -> Option<AdapterState> {
        self.slots
            .iter()
            .find(|s| s.adapter.venue() == venue)
            .map(|s| s.adapter.state())
    }

    pub fn price_table(&self) -> Arc<PriceTable> {
        Arc::clone(&self.table)
    }

    /// Receiver for every tick applied to the table, in application order
    pub fn ticks(&self) -> broadcast::Receiver<Tick> {
        self.tick_tx.subscribe()
    }

    /// Connect (and authenticate) every venue concurrently.
    /// One venue failing never affects the others.
    pub async fn connect_all(&mut self) -> Vec<ConnectReport> {
        let attempts = self.slots.iter_mut().map(|slot| async move {
            let venue = slot.adapter.venue();
            let result = establish(slot.adapter.as_mut()).await;
            match &result {
                Ok(()) => info!(venue = %venue, "Venue connected"),
                Err(e) => warn!(venue = %venue, error = %e, "Venue connect failed"),
            }
            ConnectReport { venue, result }
        });
        join_all(attempts).await
    }

    /// Subscribe ticker streams
    pub async fn subscribe(&mut self, requested: &SubscriptionRequest) -> Vec<SubscribeReport> {
        self.subscribe_kind(SubscriptionKind::Ticker, requested).await
    }

    /// Translate `requested` into each venue's native symbols and subscribe
    /// concurrently. Venues with nothing requested are skipped; venues that
    /// are down keep the request for their next reconnect.
    pub async fn subscribe_kind(
        &mut self,
        kind: SubscriptionKind,
        requested: &SubscriptionRequest,
    ) -> Vec<SubscribeReport> {
        let attempts = self.slots.iter_mut().filter_map(|slot| {
            let venue = slot.adapter.venue();
            let natives: Vec<String> = requested
                .iter()
                .filter(|(_, venues)| venues.contains(&venue))
                .map(|(symbol, _)| symbols::to_native(venue, symbol))
                .collect();
            if natives.is_empty() {
                return None;
            }

            Some(async move {
                let result = slot.adapter.subscribe(kind, &natives).await;
                match &result {
                    Ok(ack) => {
                        debug!(venue = %venue, request_id = ack.request_id, "Subscribed");
                        slot.remember(kind, &natives);
                    }
                    Err(e) if slot.adapter.state() == AdapterState::Disconnected => {
                        // Issued by the venue task once it reconnects
                        warn!(
                            venue = %venue,
                            kind = %kind,
                            error = %e,
                            "Subscribe deferred until reconnect"
                        );
                        slot.remember(kind, &natives);
                    }
                    Err(e) => warn!(venue = %venue, kind = %kind, error = %e, "Subscribe failed"),
                }
                SubscribeReport { venue, result }
            })
        });
        join_all(attempts).await
    }

    /// Close every connection
    pub async fn disconnect_all(&mut self) {
        join_all(self.slots.iter_mut().map(|slot| slot.adapter.disconnect())).await;
    }

    /// Stream from every venue until `shutdown` flips to true.
    ///
    /// Each venue gets its own task; lost connections are re-established per
    /// the reconnect policy. Returns one report per venue.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Vec<VenueRunReport> {
        let FeedAggregator {
            slots,
            table,
            tick_tx,
            reconnect,
        } = self;

        let mut tasks = JoinSet::new();
        for slot in slots {
            let worker = VenueWorker {
                slot,
                table: Arc::clone(&table),
                tick_tx: tick_tx.clone(),
                reconnect: reconnect.clone(),
                shutdown: shutdown.clone(),
                ticks_applied: 0,
                reconnects: 0,
            };
            tasks.spawn(worker.run());
        }
        drop(tick_tx);

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Venue task panicked"),
            }
        }
        reports.sort_by_key(|r| r.venue);
        reports
    }
}

impl Default for FeedAggregator {
    fn default() -> Self {
        Self::new(Arc::new(PriceTable::new()), DEFAULT_TICK_BUFFER)
    }
}

async fn establish(adapter: &mut dyn VenueAdapter) -> Result<(), AdapterError> {
    adapter.connect().await?;
    adapter.authenticate().await
}

enum Recovery {
    Recovered,
    ShutdownRequested,
    GaveUp(AdapterError),
}

struct VenueWorker {
    slot: VenueSlot,
    table: Arc<PriceTable>,
    tick_tx: broadcast::Sender<Tick>,
    reconnect: ReconnectPolicy,
    shutdown: watch::Receiver<bool>,
    ticks_applied: u64,
    reconnects: u32,
}

impl VenueWorker {
    async fn run(mut self) -> VenueRunReport {
        let venue = self.slot.adapter.venue();
        let mut last_error = None;

        let outcome = loop {
            if *self.shutdown.borrow() {
                break VenueRunOutcome::Stopped;
            }

            if self.slot.adapter.state() == AdapterState::Disconnected {
                match self.recover(last_error.take()).await {
                    Recovery::Recovered => {}
                    Recovery::ShutdownRequested => break VenueRunOutcome::Stopped,
                    Recovery::GaveUp(e) => break VenueRunOutcome::Failed(e),
                }
            }

            let event = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break VenueRunOutcome::Stopped;
                    }
                    continue;
                }
                event = self.slot.adapter.next_event() => event,
            };

            match event {
                Ok(VenueEvent::Ticker(update)) => self.apply(update.into_tick(venue, Utc::now())),
                Ok(VenueEvent::SubscriptionAck(frame)) => {
                    debug!(venue = %venue, frame = %frame, "Subscription acknowledged");
                }
                Ok(VenueEvent::KeepaliveResponse) => trace!(venue = %venue, "Keepalive"),
                Ok(other) => debug!(venue = %venue, kind = ?other.kind(), "Market data event"),
                Err(e) => {
                    warn!(venue = %venue, error = %e, "Venue stream interrupted");
                    if self.slot.adapter.state() != AdapterState::Disconnected {
                        self.slot.adapter.disconnect().await;
                    }
                    last_error = Some(e);
                }
            }
        };

        self.slot.adapter.disconnect().await;
        info!(
            venue = %venue,
            ticks_applied = self.ticks_applied,
            reconnects = self.reconnects,
            "Venue task finished"
        );

        VenueRunReport {
            venue,
            ticks_applied: self.ticks_applied,
            reconnects: self.reconnects,
            outcome,
        }
    }

    fn apply(&mut self, tick: Tick) {
        let tick_tx = &self.tick_tx;
        self.table.apply_and_publish(tick, |t| {
            // No receivers is fine; the table still holds the tick
            let _ = tick_tx.send(t.clone());
        });
        self.ticks_applied += 1;
    }

    /// Reconnect with backoff, re-authenticate and re-issue subscriptions
    async fn recover(&mut self, cause: Option<AdapterError>) -> Recovery {
        let venue = self.slot.adapter.venue();
        let mut last_error = cause.unwrap_or(AdapterError::NotConnected(venue));

        for attempt in 1..=self.reconnect.max_attempts {
            let delay = self.reconnect.delay_for(attempt);
            info!(
                venue = %venue,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Recovery::ShutdownRequested;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.reestablish().await {
                Ok(()) => {
                    self.reconnects += 1;
                    info!(venue = %venue, attempt, "Reconnected");
                    return Recovery::Recovered;
                }
                Err(e) => {
                    warn!(venue = %venue, attempt, error = %e, "Reconnect attempt failed");
                    self.slot.adapter.disconnect().await;
                    last_error = e;
                }
            }
        }

        error!(venue = %venue, error = %last_error, "Giving up on venue");
        Recovery::GaveUp(last_error)
    }

    async fn reestablish(&mut self) -> Result<(), AdapterError> {
        establish(self.slot.adapter.as_mut()).await?;
        for (kind, instruments) in &self.slot.subscriptions {
            self.slot.adapter.subscribe(*kind, instruments).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::TickerUpdate;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(SubscriptionKind, Vec<String>)>>>;

    /// Scripted adapter: fixed connect result, queued events, then silence
    struct FakeAdapter {
        venue: Venue,
        /// Connect attempts left to refuse
        connect_failures: u32,
        state: AdapterState,
        events: VecDeque<VenueEvent>,
        subscribed: Calls,
    }

    impl FakeAdapter {
        fn new(venue: Venue) -> Self {
            Self {
                venue,
                connect_failures: 0,
                state: AdapterState::Disconnected,
                events: VecDeque::new(),
                subscribed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing(venue: Venue) -> Self {
            Self::flaky(venue, u32::MAX)
        }

        fn flaky(venue: Venue, connect_failures: u32) -> Self {
            Self {
                connect_failures,
                ..Self::new(venue)
            }
        }

        fn with_ticks(mut self, ticks: &[(&str, f64)]) -> Self {
            for (symbol, price) in ticks {
                self.events.push_back(VenueEvent::Ticker(TickerUpdate {
                    native_symbol: symbol.to_string(),
                    price: *price,
                    bid: *price,
                    ask: *price,
                    exchange_ts: None,
                }));
            }
            self
        }
    }

    #[async_trait]
    impl VenueAdapter for FakeAdapter {
        fn venue(&self) -> Venue {
            self.venue
        }

        fn state(&self) -> AdapterState {
            self.state
        }

        fn requires_auth(&self) -> bool {
            false
        }

        async fn connect(&mut self) -> Result<(), AdapterError> {
            if self.connect_failures > 0 {
                self.connect_failures -= 1;
                return Err(AdapterError::Connect {
                    venue: self.venue,
                    reason: "refused".to_string(),
                });
            }
            self.state = AdapterState::Connected;
            Ok(())
        }

        async fn authenticate(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn subscribe(
            &mut self,
            kind: SubscriptionKind,
            instruments: &[String],
        ) -> Result<SubscriptionAck, AdapterError> {
            if !self.state.is_open() {
                return Err(AdapterError::NotConnected(self.venue));
            }
            self.subscribed
                .lock()
                .unwrap()
                .push((kind, instruments.to_vec()));
            self.state = AdapterState::Subscribed;
            Ok(SubscriptionAck {
                venue: self.venue,
                kind,
                instruments: instruments.to_vec(),
                request_id: 1,
            })
        }

        async fn next_event(&mut self) -> Result<VenueEvent, AdapterError> {
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }

        async fn disconnect(&mut self) {
            self.state = AdapterState::Disconnected;
        }
    }

    fn request(symbols: &[&str], venues: &[Venue]) -> SubscriptionRequest {
        symbols
            .iter()
            .map(|s| (CanonicalSymbol::new(s), venues.iter().copied().collect()))
            .collect()
    }

    #[tokio::test]
    async fn test_connect_failure_is_isolated() {
        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Binance)));
        aggregator.add_adapter(Box::new(FakeAdapter::failing(Venue::Cex)));
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Gate)));

        let reports = aggregator.connect_all().await;
        assert_eq!(reports.len(), 3);
        for report in &reports {
            match report.venue {
                Venue::Cex => assert!(matches!(report.result, Err(AdapterError::Connect { .. }))),
                _ => assert!(report.connected(), "{} should be connected", report.venue),
            }
        }
        assert_eq!(aggregator.state(Venue::Cex), Some(AdapterState::Disconnected));
        assert_eq!(aggregator.state(Venue::Gate), Some(AdapterState::Connected));
    }

    #[tokio::test]
    async fn test_subscribe_translates_to_native_symbols() {
        let binance = FakeAdapter::new(Venue::Binance);
        let cex = FakeAdapter::new(Venue::Cex);
        let gate = FakeAdapter::new(Venue::Gate);
        let (binance_calls, cex_calls, gate_calls) = (
            Arc::clone(&binance.subscribed),
            Arc::clone(&cex.subscribed),
            Arc::clone(&gate.subscribed),
        );

        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(binance));
        aggregator.add_adapter(Box::new(cex));
        aggregator.add_adapter(Box::new(gate));
        aggregator.connect_all().await;

        let mut requested = request(&["BTCUSDT"], &Venue::ALL);
        requested.insert(
            CanonicalSymbol::new("ETHUSDT"),
            [Venue::Binance].into_iter().collect(),
        );

        let reports = aggregator.subscribe(&requested).await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.result.is_ok()));

        assert_eq!(
            binance_calls.lock().unwrap()[0],
            (
                SubscriptionKind::Ticker,
                vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
            )
        );
        assert_eq!(cex_calls.lock().unwrap()[0].1, vec!["BTC:USD".to_string()]);
        assert_eq!(gate_calls.lock().unwrap()[0].1, vec!["BTC_USDT".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_failure_on_one_venue_is_reported() {
        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Binance)));
        aggregator.add_adapter(Box::new(FakeAdapter::failing(Venue::Gate)));
        aggregator.connect_all().await;

        let reports = aggregator
            .subscribe(&request(&["BTCUSDT"], &Venue::ALL))
            .await;
        let by_venue: BTreeMap<Venue, bool> =
            reports.iter().map(|r| (r.venue, r.result.is_ok())).collect();
        assert!(by_venue[&Venue::Binance]);
        assert!(!by_venue[&Venue::Gate]);
    }

    #[tokio::test]
    async fn test_run_applies_ticks_and_publishes_in_order() {
        let table = Arc::new(PriceTable::new());
        let mut aggregator = FeedAggregator::new(Arc::clone(&table), 64);
        aggregator.add_adapter(Box::new(
            FakeAdapter::new(Venue::Binance)
                .with_ticks(&[("BTCUSDT", 60000.0), ("BTCUSDT", 60005.0)]),
        ));
        aggregator.add_adapter(Box::new(
            FakeAdapter::new(Venue::Gate).with_ticks(&[("BTC_USDT", 60100.0)]),
        ));
        aggregator.connect_all().await;

        let mut ticks = aggregator.ticks();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.run(shutdown_rx));

        let mut binance_prices = Vec::new();
        for _ in 0..3 {
            let tick = ticks.recv().await.unwrap();
            assert_eq!(tick.symbol.as_str(), "BTCUSDT");
            if tick.venue == Venue::Binance {
                binance_prices.push(tick.price);
            }
        }
        assert_eq!(binance_prices, vec![60000.0, 60005.0]);

        shutdown_tx.send(true).unwrap();
        let reports = handle.await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].venue, Venue::Binance);
        assert_eq!(reports[0].ticks_applied, 2);
        assert!(matches!(reports[0].outcome, VenueRunOutcome::Stopped));
        assert_eq!(reports[1].ticks_applied, 1);

        let symbol = CanonicalSymbol::new("BTCUSDT");
        assert_eq!(table.get(&symbol, Venue::Binance).unwrap().price, 60005.0);
        assert_eq!(table.get(&symbol, Venue::Gate).unwrap().price, 60100.0);
    }

    #[tokio::test]
    async fn test_unreachable_venue_gives_up_without_stopping_others() {
        let mut aggregator = FeedAggregator::default().with_reconnect_policy(ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
        aggregator.add_adapter(Box::new(FakeAdapter::failing(Venue::Cex)));
        aggregator.add_adapter(Box::new(
            FakeAdapter::new(Venue::Binance).with_ticks(&[("BTCUSDT", 1.0)]),
        ));
        aggregator.connect_all().await;

        let mut ticks = aggregator.ticks();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.run(shutdown_rx));

        assert_eq!(ticks.recv().await.unwrap().venue, Venue::Binance);
        // Give the failing venue time to exhaust its attempts
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        let reports = handle.await.unwrap();
        let cex = reports.iter().find(|r| r.venue == Venue::Cex).unwrap();
        assert!(matches!(
            cex.outcome,
            VenueRunOutcome::Failed(AdapterError::Connect { .. })
        ));
        let binance = reports.iter().find(|r| r.venue == Venue::Binance).unwrap();
        assert!(matches!(binance.outcome, VenueRunOutcome::Stopped));
        assert_eq!(binance.ticks_applied, 1);
    }

    #[tokio::test]
    async fn test_subscription_for_down_venue_is_issued_after_reconnect() {
        let cex = FakeAdapter::flaky(Venue::Cex, 1).with_ticks(&[("BTC:USD", 60200.0)]);
        let cex_calls = Arc::clone(&cex.subscribed);

        let mut aggregator = FeedAggregator::default().with_reconnect_policy(ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
        aggregator.add_adapter(Box::new(cex));
        assert!(!aggregator.connect_all().await[0].connected());

        let reports = aggregator
            .subscribe(&request(&["BTCUSDT"], &[Venue::Cex]))
            .await;
        assert!(matches!(reports[0].result, Err(AdapterError::NotConnected(Venue::Cex))));
        assert!(cex_calls.lock().unwrap().is_empty());

        let mut ticks = aggregator.ticks();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.run(shutdown_rx));

        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick.symbol.as_str(), "BTCUSDT");
        assert_eq!(
            cex_calls.lock().unwrap()[0],
            (SubscriptionKind::Ticker, vec!["BTC:USD".to_string()])
        );

        shutdown_tx.send(true).unwrap();
        let reports = handle.await.unwrap();
        assert_eq!(reports[0].reconnects, 1);
    }

    #[tokio::test]
    async fn test_repeated_subscriptions_are_reissued_once() {
        let cex = FakeAdapter::flaky(Venue::Cex, 1).with_ticks(&[("BTC:USD", 60200.0)]);
        let cex_calls = Arc::clone(&cex.subscribed);

        let mut aggregator = FeedAggregator::default().with_reconnect_policy(ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
        aggregator.add_adapter(Box::new(cex));
        aggregator.connect_all().await;

        // Down venue: every request is deferred
        aggregator
            .subscribe(&request(&["BTCUSDT"], &[Venue::Cex]))
            .await;
        aggregator
            .subscribe(&request(&["BTCUSDT", "ETHUSDT"], &[Venue::Cex]))
            .await;
        aggregator
            .subscribe_kind(SubscriptionKind::Trades, &request(&["BTCUSDT"], &[Venue::Cex]))
            .await;
        assert_eq!(aggregator.slots[0].subscriptions.len(), 2);

        let mut ticks = aggregator.ticks();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.run(shutdown_rx));
        ticks.recv().await.unwrap();

        assert_eq!(
            *cex_calls.lock().unwrap(),
            vec![
                (
                    SubscriptionKind::Ticker,
                    vec!["BTC:USD".to_string(), "ETH:USD".to_string()]
                ),
                (SubscriptionKind::Trades, vec!["BTC:USD".to_string()]),
            ]
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_kind_passes_kind_to_each_venue() {
        let binance = FakeAdapter::new(Venue::Binance);
        let gate = FakeAdapter::new(Venue::Gate);
        let (binance_calls, gate_calls) =
            (Arc::clone(&binance.subscribed), Arc::clone(&gate.subscribed));

        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(binance));
        aggregator.add_adapter(Box::new(gate));
        aggregator.connect_all().await;

        let reports = aggregator
            .subscribe_kind(
                SubscriptionKind::OrderBook,
                &request(&["ETHUSDT"], &[Venue::Binance, Venue::Gate]),
            )
            .await;
        assert!(reports.iter().all(|r| r.result.is_ok()));
        assert_eq!(
            binance_calls.lock().unwrap()[0],
            (SubscriptionKind::OrderBook, vec!["ETHUSDT".to_string()])
        );
        assert_eq!(
            gate_calls.lock().unwrap()[0],
            (SubscriptionKind::OrderBook, vec!["ETH_USDT".to_string()])
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_every_venue() {
        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Binance)));
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Gate)));
        aggregator.connect_all().await;
        assert_eq!(aggregator.state(Venue::Gate), Some(AdapterState::Connected));

        aggregator.disconnect_all().await;
        for venue in aggregator.venues() {
            assert_eq!(aggregator.state(venue), Some(AdapterState::Disconnected));
        }
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));
        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(3200) && third <= Duration::from_millis(4800));
        assert!(policy.delay_for(30) <= Duration::from_secs(60));
    }

    #[test]
    fn test_adding_same_venue_replaces_adapter() {
        let mut aggregator = FeedAggregator::default();
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Gate)));
        aggregator.add_adapter(Box::new(FakeAdapter::new(Venue::Gate)));
        assert_eq!(aggregator.venues(), vec![Venue::Gate]);
    }
}
