//! Execution stage - Two-leg arbitrage execution
//!
//! Each opportunity is checked against the safety gate, then executed as a
//! buy on the cheap venue followed by a sell on the expensive one. The sell
//! is only placed once the buy has filled.

mod paper;

pub use paper::PaperOrderPlacer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::arbitrage::Opportunity;
use crate::risk::{GateReason, SafetyGate};
use crate::types::{CanonicalSymbol, Side, Venue};

const REPORT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub venue: Venue,
    pub symbol: CanonicalSymbol,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Failed,
}

/// What a venue did with an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub order_id: Option<String>,
}

impl OrderOutcome {
    pub fn filled(order_id: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Filled,
            reason: None,
            order_id: Some(order_id.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Failed,
            reason: Some(reason.into()),
            order_id: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Places orders on a venue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> OrderOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Buy,
    Sell,
}

impl Leg {
    /// Reason string reported when this leg does not fill
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Leg::Buy => "buy_failed",
            Leg::Sell => "sell_failed",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Buy => write!(f, "buy"),
            Leg::Sell => write!(f, "sell"),
        }
    }
}

/// Result of executing one opportunity
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionReport {
    /// Safety gate denied the trade; no order was placed
    Rejected {
        opportunity: Opportunity,
        reason: GateReason,
    },
    /// A leg did not fill. `buy` holds the filled buy when the sell failed.
    Failed {
        opportunity: Opportunity,
        leg: Leg,
        outcome: OrderOutcome,
        buy: Option<OrderOutcome>,
    },
    Completed {
        opportunity: Opportunity,
        buy: OrderOutcome,
        sell: OrderOutcome,
    },
}

impl ExecutionReport {
    pub fn opportunity(&self) -> &Opportunity {
        match self {
            ExecutionReport::Rejected { opportunity, .. }
            | ExecutionReport::Failed { opportunity, .. }
            | ExecutionReport::Completed { opportunity, .. } => opportunity,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionReport::Completed { .. })
    }
}

pub struct ArbitrageExecutor {
    placer: Arc<dyn OrderPlacer>,
    gate: Arc<SafetyGate>,
    reports: broadcast::Sender<ExecutionReport>,
    /// Held for the whole of one execution
    in_flight: Mutex<()>,
}

impl ArbitrageExecutor {
    pub fn new(placer: Arc<dyn OrderPlacer>, gate: Arc<SafetyGate>) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        Self {
            placer,
            gate,
            reports,
            in_flight: Mutex::new(()),
        }
    }

    /// Receive every report produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionReport> {
        self.reports.subscribe()
    }

    pub fn gate(&self) -> &Arc<SafetyGate> {
        &self.gate
    }

    /// Execute `opportunity` for `amount` units. `balance`, when known, is
    /// checked against the gate's balance floor.
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        amount: f64,
        balance: Option<f64>,
    ) -> ExecutionReport {
        let _guard = self.in_flight.lock().await;
        let report = self.execute_legs(opportunity, amount, balance).await;
        self.publish(&report);
        report
    }

    async fn execute_legs(
        &self,
        opportunity: &Opportunity,
        amount: f64,
        balance: Option<f64>,
    ) -> ExecutionReport {
        let symbol = opportunity.symbol.as_str();
        let decision = self.gate.can_trade(symbol, amount, balance);
        if !decision.allowed {
            return ExecutionReport::Rejected {
                opportunity: opportunity.clone(),
                reason: decision.reason,
            };
        }

        let buy = self
            .placer
            .place_order(OrderRequest {
                venue: opportunity.buy_venue,
                symbol: opportunity.symbol.clone(),
                side: Side::Buy,
                amount,
                price: opportunity.buy_price,
            })
            .await;
        // Counts against the limits once an order has gone out
        self.gate.record_trade(symbol, amount);

        if !buy.is_filled() {
            return ExecutionReport::Failed {
                opportunity: opportunity.clone(),
                leg: Leg::Buy,
                outcome: buy,
                buy: None,
            };
        }

        let sell = self
            .placer
            .place_order(OrderRequest {
                venue: opportunity.sell_venue,
                symbol: opportunity.symbol.clone(),
                side: Side::Sell,
                amount,
                price: opportunity.sell_price,
            })
            .await;

        if !sell.is_filled() {
            return ExecutionReport::Failed {
                opportunity: opportunity.clone(),
                leg: Leg::Sell,
                outcome: sell,
                buy: Some(buy),
            };
        }

        ExecutionReport::Completed {
            opportunity: opportunity.clone(),
            buy,
            sell,
        }
    }

    fn publish(&self, report: &ExecutionReport) {
        let opportunity = report.opportunity();
        match report {
            ExecutionReport::Rejected { reason, .. } => {
                info!(
                    id = %opportunity.id,
                    symbol = %opportunity.symbol,
                    reason = %reason,
                    "Execution rejected by safety gate"
                );
            }
            ExecutionReport::Failed { leg, outcome, .. } => {
                warn!(
                    id = %opportunity.id,
                    symbol = %opportunity.symbol,
                    reason = leg.failure_reason(),
                    detail = outcome.reason.as_deref().unwrap_or(""),
                    "Execution failed"
                );
            }
            ExecutionReport::Completed { .. } => {
                info!(id = %opportunity.id, symbol = %opportunity.symbol, "Execution completed");
            }
        }
        // Nobody listening is fine
        let _ = self.reports.send(report.clone());
    }
}
