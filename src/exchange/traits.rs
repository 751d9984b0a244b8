//! Venue-agnostic interfaces the rebalancing engine talks to.
//!
//! The engine never sees exchange wire formats. It consumes:
//! - [`MarketDataGateway`] for symbols, candles and live prices
//! - [`ExecutionAdapter`] for live position snapshots and orders
//!
//! Both are implemented by the Bybit REST client and, in tests, by the
//! in-memory mock venue.

use crate::error::{GatewayError, OrderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Profit of `size` units opened at `entry` and marked at `price`.
    pub fn pnl(self, entry: Decimal, price: Decimal, size: Decimal) -> Decimal {
        match self {
            Side::Long => (price - entry) * size,
            Side::Short => (entry - price) * size,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// One closed kline; only the close feeds the volatility estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub close: Decimal,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self { timestamp, close }
    }
}

/// An open position, either simulated or mirrored from the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Units of the underlying (always positive)
    pub size: Decimal,
    pub entry_price: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: Side, size: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            entry_price,
        }
    }

    /// PnL if the position were closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.side.pnl(self.entry_price, price, self.size)
    }

    /// Notional value at entry.
    pub fn entry_notional(&self) -> Decimal {
        self.size * self.entry_price
    }
}

/// Source of symbols, candles and prices.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// All symbols currently tradable as USDT linear perpetuals.
    async fn list_tradable_symbols(&self) -> Result<BTreeSet<String>, GatewayError>;

    /// Most recent `limit` candles in ascending time order.
    ///
    /// An empty vector means the venue has no data for the symbol.
    async fn get_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>, GatewayError>;

    /// Current mark price. `None` (or zero) means the price is unavailable.
    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError>;
}

/// Places orders against a live account.
///
/// Implementations own lot-size rounding, leverage setup and minimum-quantity
/// enforcement; callers only speak in sides, sizes and notionals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Positions currently open on the account.
    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError>;

    /// Flatten `size` units of an existing position.
    async fn close_position(&self, symbol: &str, side: Side, size: Decimal)
        -> Result<(), OrderError>;

    /// Open a new position worth `notional` USDT.
    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<(), OrderError>;
}
