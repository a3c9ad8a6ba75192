//! crossarb - cross-venue arbitrage monitor
//!
//! Streams tickers from every configured venue into one price table, scans
//! it for fee-adjusted arbitrage and, in dry-run mode, paper-executes what
//! passes the safety gate.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crossarb::arbitrage::{ArbitrageDetector, FeeBook, Opportunity, StaticFeeSource};
use crossarb::config::{AppConfig, ExecutionConfig};
use crossarb::execution::{ArbitrageExecutor, ExecutionReport, PaperOrderPlacer};
use crossarb::feed::venues::build_adapter;
use crossarb::feed::{FeedAggregator, PriceTable, VenueRunOutcome};
use crossarb::risk::SafetyGate;

const OPPORTUNITY_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init();
    info!(config = %config, "Starting crossarb");

    // Fees
    let fees = Arc::new(FeeBook::default());
    let fee_entries = fees
        .refresh(&StaticFeeSource::from_config(&config.fees))
        .await;
    info!(entries = fee_entries, "Fee table loaded");

    // Feed
    let venues = config.feed.enabled_venues()?;
    let table = Arc::new(PriceTable::new());
    let mut aggregator = FeedAggregator::new(Arc::clone(&table), config.feed.tick_buffer)
        .with_reconnect_policy(config.feed.reconnect_policy());
    for &venue in &venues {
        aggregator.add_adapter(build_adapter(
            venue,
            config.feed.adapter_settings(venue),
            AppConfig::credentials_for(venue),
        ));
    }

    let connected = aggregator
        .connect_all()
        .await
        .iter()
        .filter(|report| report.connected())
        .count();
    if connected == 0 {
        aggregator.disconnect_all().await;
        bail!("No venue could be reached");
    }
    info!(connected, total = venues.len(), "Venues connected");

    let request = config.feed.subscription_request(&venues);
    for report in aggregator.subscribe(&request).await {
        match report.result {
            Ok(ack) => info!(
                venue = %report.venue,
                instruments = ?ack.instruments,
                request_id = ack.request_id,
                "Ticker subscription sent"
            ),
            Err(e) => warn!(venue = %report.venue, error = %e, "Ticker subscription not sent"),
        }
    }

    // Pipeline: aggregator -> detector -> execution
    let ticks = aggregator.ticks();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed_task = tokio::spawn(aggregator.run(shutdown_rx));

    let (opportunity_tx, opportunity_rx) = mpsc::channel(OPPORTUNITY_BUFFER);
    let detector = ArbitrageDetector::new(Arc::clone(&fees), config.detector.min_profit_threshold);
    let detector_table = Arc::clone(&table);
    let detector_task =
        tokio::spawn(async move { detector.run(ticks, detector_table, opportunity_tx).await });

    let gate = Arc::new(SafetyGate::new(config.safety.to_safety_config()));
    let execution_task = tokio::spawn(execution_loop(
        opportunity_rx,
        config.execution.clone(),
        gate,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    // Every receiver may already be gone if all venue tasks ended
    let _ = shutdown_tx.send(true);

    match feed_task.await {
        Ok(reports) => {
            for report in reports {
                match report.outcome {
                    VenueRunOutcome::Stopped => info!(
                        venue = %report.venue,
                        ticks_applied = report.ticks_applied,
                        reconnects = report.reconnects,
                        "Venue stopped"
                    ),
                    VenueRunOutcome::Failed(e) => error!(
                        venue = %report.venue,
                        ticks_applied = report.ticks_applied,
                        reconnects = report.reconnects,
                        error = %e,
                        "Venue failed"
                    ),
                }
            }
        }
        Err(e) => error!(error = %e, "Feed task panicked"),
    }

    // The tick channel closes with the feed, which ends the detector and
    // then the execution loop
    if let Err(e) = detector_task.await {
        error!(error = %e, "Detector task panicked");
    }
    if let Err(e) = execution_task.await {
        error!(error = %e, "Execution task panicked");
    }

    info!(symbols = table.symbol_count(), version = table.version(), "crossarb stopped");
    Ok(())
}

/// Paper-execute opportunities in dry-run mode; otherwise only log them
async fn execution_loop(
    mut opportunities: mpsc::Receiver<Opportunity>,
    config: ExecutionConfig,
    gate: Arc<SafetyGate>,
) {
    if !config.dry_run {
        warn!("Live order placement is not available; opportunities are logged only");
        while let Some(opportunity) = opportunities.recv().await {
            info!(opportunity = %opportunity, "Opportunity not executed");
        }
        return;
    }

    let executor = ArbitrageExecutor::new(Arc::new(PaperOrderPlacer::new()), gate);
    while let Some(opportunity) = opportunities.recv().await {
        match executor.execute(&opportunity, config.trade_amount, None).await {
            ExecutionReport::Rejected { reason, .. } => {
                info!(
                    id = %opportunity.id,
                    reason = %reason,
                    "Opportunity rejected by safety gate"
                );
            }
            ExecutionReport::Failed { leg, outcome, .. } => {
                warn!(
                    id = %opportunity.id,
                    leg = %leg,
                    reason = outcome.reason.as_deref().unwrap_or("unknown"),
                    "Paper execution failed"
                );
            }
            ExecutionReport::Completed { .. } => {
                info!(
                    id = %opportunity.id,
                    symbol = %opportunity.symbol,
                    "Paper execution completed"
                );
            }
        }
    }
}
