//! Volatility ranking of the alt universe.

use crate::config::Config;
use crate::exchange::{Candle, MarketDataGateway};
use crate::utils::to_f64;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Realized volatility of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityScore {
    pub symbol: String,
    pub volatility: f64,
}

impl VolatilityScore {
    pub fn new(symbol: impl Into<String>, volatility: f64) -> Self {
        Self {
            symbol: symbol.into(),
            volatility,
        }
    }
}

/// Why a symbol was left out of the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unrankable {
    #[error("insufficient history: got {got} candles, need {need}")]
    InsufficientHistory { got: usize, need: usize },
    #[error("volatility is not a finite number")]
    NonFinite,
    #[error("candle fetch failed: {0}")]
    FetchFailed(String),
}

/// Ranked scores, most volatile first, plus the symbols that could not be scored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub scores: Vec<VolatilityScore>,
    pub skipped: Vec<(String, Unrankable)>,
}

impl Ranking {
    /// At most `n` leading scores.
    pub fn top(&self, n: usize) -> &[VolatilityScore] {
        &self.scores[..n.min(self.scores.len())]
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Parameters for [`VolatilityRanker`].
#[derive(Debug, Clone)]
pub struct RankerConfig {
    /// Excluded from the alt universe
    pub reference_symbol: String,
    /// Number of log-returns in the window
    pub lookback: usize,
    /// Candles requested per symbol
    pub candle_limit: usize,
    /// Fetches kept in flight
    pub concurrency: usize,
    /// Pause before every Nth fetch (0 disables pacing)
    pub pacing_every: usize,
    pub pacing_ms: u64,
}

impl RankerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reference_symbol: config.strategy.reference_symbol.clone(),
            lookback: config.strategy.lookback,
            candle_limit: config.candle_limit(),
            concurrency: config.market_data.fetch_concurrency,
            pacing_every: config.market_data.pacing_every,
            pacing_ms: config.market_data.pacing_ms,
        }
    }
}

/// Sample standard deviation (n - 1 denominator). NaN for fewer than two values.
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Volatility over the trailing `lookback` log-returns of ascending candles.
///
/// Fewer than `lookback` candles is unrankable, never a number. With exactly
/// `lookback` candles the window holds `lookback - 1` returns.
pub fn realized_volatility(candles: &[Candle], lookback: usize) -> Result<f64, Unrankable> {
    if candles.len() < lookback {
        return Err(Unrankable::InsufficientHistory {
            got: candles.len(),
            need: lookback,
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let window = &returns[returns.len().saturating_sub(lookback)..];

    let volatility = sample_std_dev(window);
    if volatility.is_finite() {
        Ok(volatility)
    } else {
        Err(Unrankable::NonFinite)
    }
}

/// Scores every alt by realized volatility.
pub struct VolatilityRanker {
    config: RankerConfig,
}

impl VolatilityRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    /// Rank `symbols` (minus the reference asset) by volatility, descending.
    ///
    /// Fetches run concurrently; the result is sorted only after all of them
    /// complete, with ties broken by symbol so the order is reproducible.
    #[instrument(skip(self, gateway, symbols), fields(universe = symbols.len()))]
    pub async fn rank(&self, gateway: &dyn MarketDataGateway, symbols: &BTreeSet<String>) -> Ranking {
        let candidates: Vec<&String> = symbols
            .iter()
            .filter(|s| **s != self.config.reference_symbol)
            .collect();
        info!(count = candidates.len(), "Calculating volatility");

        let config = &self.config;
        let outcomes: Vec<(String, Result<f64, Unrankable>)> =
            stream::iter(candidates.into_iter().enumerate())
                .map(|(i, symbol)| async move {
                    if config.pacing_every > 0 && config.pacing_ms > 0 && i % config.pacing_every == 0
                    {
                        tokio::time::sleep(Duration::from_millis(config.pacing_ms)).await;
                    }
                    let outcome = match gateway.get_candles(symbol, config.candle_limit).await {
                        Ok(candles) => realized_volatility(&candles, config.lookback),
                        Err(e) => Err(Unrankable::FetchFailed(e.to_string())),
                    };
                    (symbol.clone(), outcome)
                })
                .buffer_unordered(config.concurrency.max(1))
                .collect()
                .await;

        let mut ranking = Ranking::default();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(volatility) => ranking.scores.push(VolatilityScore::new(symbol, volatility)),
                Err(reason) => {
                    debug!(%symbol, %reason, "Symbol not ranked");
                    ranking.skipped.push((symbol, reason));
                }
            }
        }

        ranking.scores.sort_by(|a, b| {
            b.volatility
                .total_cmp(&a.volatility)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranking.skipped.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            ranked = ranking.scores.len(),
            skipped = ranking.skipped.len(),
            "Volatility ranking complete"
        );
        for score in ranking.top(5) {
            info!(
                symbol = %score.symbol,
                volatility = %format_args!("{:.4}", score.volatility),
                "High-vol alt"
            );
        }

        ranking
    }
}
