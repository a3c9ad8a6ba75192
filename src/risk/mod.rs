//! Safety gate - Admission control for trades
//!
//! Checked before every execution, in this order:
//! - Emergency stop
//! - Daily trade count
//! - Per-trade position size
//! - Cooldown since the last trade
//! - Balance floor (when a balance is supplied)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Safety limits
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Maximum trades per day
    pub max_daily_trades: u32,
    /// Maximum amount per trade
    pub max_position_size: f64,
    /// Minimum time between trades
    pub trade_cooldown: Duration,
    /// Balance that must remain after a trade
    pub min_balance: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_daily_trades: 50,
            max_position_size: 1000.0,
            trade_cooldown: Duration::from_secs(30),
            min_balance: 0.0,
        }
    }
}

/// Why a trade was allowed or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Ok,
    EmergencyStop,
    DailyTradeLimit,
    MaxPositionSize,
    TradeCooldown,
    InsufficientBalance,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::Ok => write!(f, "ok"),
            GateReason::EmergencyStop => write!(f, "emergency_stop"),
            GateReason::DailyTradeLimit => write!(f, "daily_trade_limit"),
            GateReason::MaxPositionSize => write!(f, "max_position_size"),
            GateReason::TradeCooldown => write!(f, "trade_cooldown"),
            GateReason::InsufficientBalance => write!(f, "insufficient_balance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeDecision {
    pub allowed: bool,
    pub reason: GateReason,
}

impl TradeDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: GateReason::Ok,
        }
    }

    fn deny(reason: GateReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub at: DateTime<Utc>,
    pub symbol: String,
    pub amount: f64,
}

/// Mutable gate state
#[derive(Debug, Clone, Default)]
pub struct SafetyState {
    pub daily_trade_count: u32,
    pub daily_volume: f64,
    /// `None` until the first trade, so the cooldown never blocks it
    pub last_trade_time: Option<DateTime<Utc>>,
    pub emergency_stopped: bool,
    pub trade_log: Vec<TradeRecord>,
}

pub struct SafetyGate {
    config: SafetyConfig,
    state: Mutex<SafetyState>,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SafetyState::default()),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn can_trade(&self, symbol: &str, amount: f64, balance: Option<f64>) -> TradeDecision {
        self.can_trade_at(symbol, amount, balance, Utc::now())
    }

    /// Evaluate a prospective trade against the clock reading `now`
    pub fn can_trade_at(
        &self,
        _symbol: &str,
        amount: f64,
        balance: Option<f64>,
        now: DateTime<Utc>,
    ) -> TradeDecision {
        let state = self.lock();

        if state.emergency_stopped {
            return TradeDecision::deny(GateReason::EmergencyStop);
        }
        if state.daily_trade_count >= self.config.max_daily_trades {
            return TradeDecision::deny(GateReason::DailyTradeLimit);
        }
        if amount > self.config.max_position_size {
            return TradeDecision::deny(GateReason::MaxPositionSize);
        }
        if let Some(last) = state.last_trade_time {
            if now.signed_duration_since(last) < self.cooldown() {
                return TradeDecision::deny(GateReason::TradeCooldown);
            }
        }
        if let Some(balance) = balance {
            if balance < amount + self.config.min_balance {
                return TradeDecision::deny(GateReason::InsufficientBalance);
            }
        }

        TradeDecision::allow()
    }

    pub fn record_trade(&self, symbol: &str, amount: f64) {
        self.record_trade_at(symbol, amount, Utc::now());
    }

    pub fn record_trade_at(&self, symbol: &str, amount: f64, at: DateTime<Utc>) {
        let mut state = self.lock();
        state.daily_trade_count += 1;
        state.daily_volume += amount;
        state.last_trade_time = Some(at);
        state.trade_log.push(TradeRecord {
            at,
            symbol: symbol.to_string(),
            amount,
        });
    }

    /// Deny every trade until [`resume`](Self::resume)
    pub fn emergency_stop(&self) {
        self.lock().emergency_stopped = true;
        warn!("EMERGENCY STOP ACTIVATED");
    }

    pub fn resume(&self) {
        self.lock().emergency_stopped = false;
        info!("Trading resumed");
    }

    /// Zero the daily counters and clear the trade log. The cooldown clock is kept.
    pub fn reset_daily_limits(&self) {
        let mut state = self.lock();
        state.daily_trade_count = 0;
        state.daily_volume = 0.0;
        state.trade_log.clear();
        info!("Daily limits reset");
    }

    pub fn state(&self) -> SafetyState {
        self.lock().clone()
    }

    /// Cooldowns beyond chrono's range saturate instead of wrapping
    fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.trade_cooldown)
            .unwrap_or_else(|_| ChronoDuration::max_value())
    }

    fn lock(&self) -> MutexGuard<'_, SafetyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}
