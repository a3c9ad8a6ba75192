//! Configuration management for crossarb
//!
//! Built-in defaults, then `config/default.*` and `config/local.*`, then
//! `CROSSARB__*` environment variables (via .env). Venue API credentials are
//! read from the environment only.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::arbitrage::FeeRate;
use crate::feed::venues::{AdapterSettings, Credentials, KeepaliveConfig};
use crate::feed::{symbols, ReconnectPolicy, SubscriptionRequest};
use crate::risk::SafetyConfig;
use crate::types::Venue;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub detector: DetectorConfig,
    pub safety: SafetySettings,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
    /// Static taker/maker fees: venue id -> native symbol -> rate
    #[serde(default)]
    pub fees: HashMap<String, HashMap<String, FeeRate>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Venue ids to stream from (binance, cex, gate)
    pub venues: Vec<String>,
    /// Symbols to monitor, in any venue-native form
    pub symbols: Vec<String>,
    pub binance_url: String,
    pub cex_url: String,
    pub gate_url: String,
    /// WebSocket connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Venue ping interval in seconds
    pub keepalive_interval_secs: u64,
    /// Silence after which a connection is declared lost, in seconds
    pub keepalive_timeout_secs: u64,
    /// Broadcast buffer for published ticks
    pub tick_buffer: usize,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Minimum net profit as a fraction of the buy price (0.001 = 0.1%)
    pub min_profit_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetySettings {
    pub max_daily_trades: u32,
    pub max_position_size: f64,
    /// Minimum seconds between trades
    pub trade_cooldown_secs: u64,
    pub min_balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Execute opportunities with the paper placer; otherwise only log them
    pub dry_run: bool,
    /// Base-currency amount per arbitrage
    pub trade_amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults_builder()
            .context("Failed to set configuration defaults")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CROSSARB__*)
            .add_source(
                Environment::with_prefix("CROSSARB")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("feed.symbols")
                    .with_list_parse_key("feed.venues"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Built-in defaults only, ignoring files and environment
    pub fn defaults() -> Result<Self> {
        let config = Self::defaults_builder()?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    fn defaults_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let safety = SafetyConfig::default();

        Config::builder()
            // Feed defaults
            .set_default("feed.venues", vec!["binance", "cex", "gate"])?
            .set_default("feed.symbols", vec!["BTCUSDT", "ETHUSDT"])?
            .set_default("feed.binance_url", crate::feed::venues::BINANCE_WS_URL)?
            .set_default("feed.cex_url", crate::feed::venues::CEX_WS_URL)?
            .set_default("feed.gate_url", crate::feed::venues::GATE_WS_URL)?
            .set_default("feed.connect_timeout_secs", 10)?
            .set_default("feed.keepalive_interval_secs", 15)?
            .set_default("feed.keepalive_timeout_secs", 45)?
            .set_default("feed.tick_buffer", 1024)?
            .set_default("feed.reconnect_max_attempts", 10)?
            .set_default("feed.reconnect_base_delay_ms", 1000)?
            .set_default("feed.reconnect_max_delay_ms", 60_000)?
            // Detector defaults
            .set_default("detector.min_profit_threshold", 0.001)?
            // Safety defaults
            .set_default("safety.max_daily_trades", safety.max_daily_trades)?
            .set_default("safety.max_position_size", safety.max_position_size)?
            .set_default("safety.trade_cooldown_secs", safety.trade_cooldown.as_secs())?
            .set_default("safety.min_balance", safety.min_balance)?
            // Execution defaults
            .set_default("execution.dry_run", true)?
            .set_default("execution.trade_amount", 0.001)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    fn validate(&self) -> Result<()> {
        self.feed.enabled_venues()?;
        if self.feed.symbols.is_empty() {
            bail!("feed.symbols must list at least one symbol");
        }
        if self.feed.keepalive_timeout_secs <= self.feed.keepalive_interval_secs {
            bail!(
                "feed.keepalive_timeout_secs ({}) must exceed feed.keepalive_interval_secs ({})",
                self.feed.keepalive_timeout_secs,
                self.feed.keepalive_interval_secs
            );
        }
        if self.execution.trade_amount <= 0.0 {
            bail!("execution.trade_amount must be positive");
        }
        Ok(())
    }

    /// API credentials for `venue` from the environment
    pub fn credentials_for(venue: Venue) -> Option<Credentials> {
        match venue {
            Venue::Binance => Credentials::from_env("BINANCE_API_KEY", "BINANCE_API_SECRET"),
            Venue::Cex => Credentials::from_env("CEXIO_API_KEY", "CEXIO_API_SECRET"),
            Venue::Gate => Credentials::from_env("GATEIO_API_KEY", "GATEIO_API_SECRET"),
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "venues={:?} symbols={:?} min_profit={:.4} dry_run={} trade_amount={} max_daily_trades={} fee_venues={}",
            self.feed.venues,
            self.feed.symbols,
            self.detector.min_profit_threshold,
            self.execution.dry_run,
            self.execution.trade_amount,
            self.safety.max_daily_trades,
            self.fees.len()
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

impl FeedConfig {
    /// Configured venues, deduplicated, in venue order
    pub fn enabled_venues(&self) -> Result<Vec<Venue>> {
        let mut venues = BTreeSet::new();
        for id in &self.venues {
            match Venue::from_id(id) {
                Some(venue) => {
                    venues.insert(venue);
                }
                None => bail!("Unknown venue '{}' in feed.venues", id),
            }
        }
        if venues.is_empty() {
            bail!("feed.venues must list at least one venue");
        }
        Ok(venues.into_iter().collect())
    }

    pub fn url_for(&self, venue: Venue) -> &str {
        match venue {
            Venue::Binance => &self.binance_url,
            Venue::Cex => &self.cex_url,
            Venue::Gate => &self.gate_url,
        }
    }

    pub fn keepalive(&self) -> KeepaliveConfig {
        KeepaliveConfig {
            interval: Duration::from_secs(self.keepalive_interval_secs),
            timeout: Duration::from_secs(self.keepalive_timeout_secs),
        }
    }

    pub fn adapter_settings(&self, venue: Venue) -> AdapterSettings {
        AdapterSettings {
            url: self.url_for(venue).to_string(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            keepalive: self.keepalive(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }

    /// Every configured symbol on every given venue
    pub fn subscription_request(&self, venues: &[Venue]) -> SubscriptionRequest {
        self.symbols
            .iter()
            .map(|s| (symbols::canonicalize(s), venues.iter().copied().collect()))
            .collect()
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        if self.json {
            fmt().json().with_env_filter(filter).init();
        } else {
            fmt().compact().with_env_filter(filter).init();
        }
    }
}

impl SafetySettings {
    pub fn to_safety_config(&self) -> SafetyConfig {
        SafetyConfig {
            max_daily_trades: self.max_daily_trades,
            max_position_size: self.max_position_size,
            trade_cooldown: Duration::from_secs(self.trade_cooldown_secs),
            min_balance: self.min_balance,
        }
    }
}
