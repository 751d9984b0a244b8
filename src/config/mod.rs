//! Configuration management for the high-volatility short bot.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Most rows Bybit's kline endpoint returns in one request.
pub const MAX_KLINE_LIMIT: usize = 1000;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bybit API credentials
    #[serde(default)]
    pub bybit: BybitConfig,
    /// Strategy parameters (capital, basket size, lookback)
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Candle fetching behaviour
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret used to sign requests
    #[serde(default)]
    pub api_secret: String,
    /// Use testnet instead of production (live trading only)
    #[serde(default = "default_testnet")]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Capital in USDT; the long leg and the short basket each get this much notional
    #[serde(default = "default_capital")]
    pub capital: Decimal,
    /// Number of alts in the short basket
    #[serde(default = "default_n_shorts")]
    pub n_shorts: usize,
    /// Number of log-returns in the volatility window
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Asset held long with full capital
    #[serde(default = "default_reference_symbol")]
    pub reference_symbol: String,
    /// Kline interval in minutes as the exchange spells it ("240" = 4h)
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Extra candles requested beyond the lookback
    #[serde(default = "default_history_margin")]
    pub history_margin: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Candle requests kept in flight at once
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Pause before every Nth candle request
    #[serde(default = "default_pacing_every")]
    pub pacing_every: usize,
    /// Length of that pause in milliseconds
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Simulate fills in the in-memory ledger instead of placing orders
    #[serde(default = "default_paper_trade")]
    pub paper_trade: bool,
    /// Leverage set on every symbol before opening
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Delay between live order submissions in milliseconds
    #[serde(default = "default_order_pacing_ms")]
    pub order_pacing_ms: u64,
}

// Default value functions
fn default_testnet() -> bool {
    true
}

fn default_capital() -> Decimal {
    Decimal::new(1000, 0) // 1000 USDT
}

fn default_n_shorts() -> usize {
    20
}

fn default_lookback() -> usize {
    30
}

fn default_reference_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_candle_interval() -> String {
    "240".to_string()
}

fn default_history_margin() -> usize {
    5 // absorbs the return lost to differencing plus a partial candle
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_pacing_every() -> usize {
    10
}

fn default_pacing_ms() -> u64 {
    100
}

fn default_paper_trade() -> bool {
    true
}

fn default_leverage() -> u8 {
    1
}

fn default_order_pacing_ms() -> u64 {
    200
}

impl Config {
    /// Load configuration from environment variables and config files.
    ///
    /// Environment variables use the `HVS` prefix and `__` as the section
    /// separator, e.g. `HVS__STRATEGY__N_SHORTS=10`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("HVS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.capital > Decimal::ZERO,
            "capital must be positive"
        );

        anyhow::ensure!(self.strategy.n_shorts >= 1, "n_shorts must be at least 1");

        anyhow::ensure!(
            self.strategy.lookback >= 2,
            "lookback must be at least 2 to compute a sample deviation"
        );

        anyhow::ensure!(
            self.candle_limit() <= MAX_KLINE_LIMIT,
            "lookback + history_margin = {} exceeds the {} candles a kline request can return",
            self.candle_limit(),
            MAX_KLINE_LIMIT
        );

        anyhow::ensure!(
            !self.strategy.reference_symbol.is_empty(),
            "reference_symbol must not be empty"
        );

        anyhow::ensure!(self.execution.leverage >= 1, "leverage must be >= 1");

        anyhow::ensure!(
            self.market_data.fetch_concurrency >= 1,
            "fetch_concurrency must be at least 1"
        );

        if !self.execution.paper_trade {
            anyhow::ensure!(
                !self.bybit.api_key.is_empty() && !self.bybit.api_secret.is_empty(),
                "live trading requires bybit.api_key and bybit.api_secret"
            );
        }

        Ok(())
    }

    /// Number of candles to request per symbol.
    pub fn candle_limit(&self) -> usize {
        self.strategy.lookback + self.strategy.history_margin
    }
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: default_testnet(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            capital: default_capital(),
            n_shorts: default_n_shorts(),
            lookback: default_lookback(),
            reference_symbol: default_reference_symbol(),
            candle_interval: default_candle_interval(),
            history_margin: default_history_margin(),
        }
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            pacing_every: default_pacing_every(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            paper_trade: default_paper_trade(),
            leverage: default_leverage(),
            order_pacing_ms: default_order_pacing_ms(),
        }
    }
}
