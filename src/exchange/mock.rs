//! In-memory exchange for tests and dry runs.

use super::traits::{Candle, ExecutionAdapter, MarketDataGateway, Position, Side};
use crate::error::{GatewayError, OrderError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// An order accepted by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOrder {
    Open {
        symbol: String,
        side: Side,
        notional: Decimal,
    },
    Close {
        symbol: String,
        side: Side,
        size: Decimal,
    },
}

#[derive(Debug, Default)]
struct MockMarket {
    symbols: BTreeSet<String>,
    candles: HashMap<String, Vec<Candle>>,
    prices: HashMap<String, Decimal>,
    positions: BTreeMap<String, Position>,
    failing_candles: HashSet<String>,
    failing_prices: HashSet<String>,
    rejecting_orders: HashSet<String>,
    listing_fails: bool,
    orders: Vec<MockOrder>,
}

/// Simulated venue implementing both the gateway and the execution adapter.
///
/// Cloning shares the underlying state, so a test can keep a handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    state: Arc<RwLock<MockMarket>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// List `symbol` as tradable with 4h candles closing at `closes`.
    ///
    /// The last close also becomes the current price.
    pub async fn add_symbol(&self, symbol: &str, closes: &[Decimal]) {
        let start = DateTime::<Utc>::from_timestamp(1_700_006_400, 0).unwrap_or_default();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle::new(start + Duration::hours(4 * i as i64), *close))
            .collect();

        let mut state = self.state.write().await;
        state.symbols.insert(symbol.to_string());
        state.candles.insert(symbol.to_string(), candles);
        if let Some(last) = closes.last() {
            state.prices.insert(symbol.to_string(), *last);
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    pub async fn remove_price(&self, symbol: &str) {
        self.state.write().await.prices.remove(symbol);
    }

    /// Seed an open position on the simulated account.
    pub async fn set_position(&self, position: Position) {
        self.state
            .write()
            .await
            .positions
            .insert(position.symbol.clone(), position);
    }

    pub async fn fail_candles(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_candles
            .insert(symbol.to_string());
    }

    pub async fn fail_price(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_prices
            .insert(symbol.to_string());
    }

    pub async fn reject_orders(&self, symbol: &str) {
        self.state
            .write()
            .await
            .rejecting_orders
            .insert(symbol.to_string());
    }

    pub async fn fail_listing(&self, fails: bool) {
        self.state.write().await.listing_fails = fails;
    }

    /// Orders accepted so far, in submission order.
    pub async fn orders(&self) -> Vec<MockOrder> {
        self.state.read().await.orders.clone()
    }

    pub async fn positions(&self) -> BTreeMap<String, Position> {
        self.state.read().await.positions.clone()
    }
}

#[async_trait]
impl MarketDataGateway for MockExchange {
    async fn list_tradable_symbols(&self) -> Result<BTreeSet<String>, GatewayError> {
        let state = self.state.read().await;
        if state.listing_fails {
            return Err(GatewayError::Transport("symbol listing unavailable".to_string()));
        }
        Ok(state.symbols.clone())
    }

    async fn get_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>, GatewayError> {
        let state = self.state.read().await;
        if state.failing_candles.contains(symbol) {
            return Err(GatewayError::Transport(format!("kline request for {symbol} timed out")));
        }

        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError> {
        let state = self.state.read().await;
        if state.failing_prices.contains(symbol) {
            return Err(GatewayError::Transport(format!("ticker request for {symbol} timed out")));
        }
        Ok(state.prices.get(symbol).copied())
    }
}

#[async_trait]
impl ExecutionAdapter for MockExchange {
    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError> {
        Ok(self.state.read().await.positions.values().cloned().collect())
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> Result<(), OrderError> {
        let mut state = self.state.write().await;
        if state.rejecting_orders.contains(symbol) {
            return Err(OrderError::Rejected {
                symbol: symbol.to_string(),
                reason: "simulated rejection".to_string(),
            });
        }

        let remaining = match state.positions.get(symbol) {
            Some(existing) if existing.side == side => existing.size - size,
            _ => {
                return Err(OrderError::Rejected {
                    symbol: symbol.to_string(),
                    reason: format!("no {side} position to close"),
                })
            }
        };
        if remaining > Decimal::ZERO {
            if let Some(existing) = state.positions.get_mut(symbol) {
                existing.size = remaining;
            }
        } else {
            state.positions.remove(symbol);
        }

        state.orders.push(MockOrder::Close {
            symbol: symbol.to_string(),
            side,
            size,
        });
        debug!(%symbol, %side, %size, "Mock close filled");
        Ok(())
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<(), OrderError> {
        let mut state = self.state.write().await;
        if state.rejecting_orders.contains(symbol) {
            return Err(OrderError::Rejected {
                symbol: symbol.to_string(),
                reason: "simulated rejection".to_string(),
            });
        }

        let price = state
            .prices
            .get(symbol)
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| OrderError::NoPrice(symbol.to_string()))?;
        let size = notional / price;

        state
            .positions
            .insert(symbol.to_string(), Position::new(symbol, side, size, price));
        state.orders.push(MockOrder::Open {
            symbol: symbol.to_string(),
            side,
            notional,
        });
        debug!(%symbol, %side, %notional, %price, "Mock open filled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_candles_truncate_to_most_recent() {
        let mock = MockExchange::new();
        mock.add_symbol("ETHUSDT", &[dec!(1), dec!(2), dec!(3), dec!(4)])
            .await;

        let candles = mock.get_candles("ETHUSDT", 2).await.unwrap();
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(3), dec!(4)]);
        assert!(candles[0].timestamp < candles[1].timestamp);

        assert!(mock.get_candles("NOPEUSDT", 2).await.unwrap().is_empty());
        assert_eq!(
            mock.get_current_price("ETHUSDT").await.unwrap(),
            Some(dec!(4))
        );
    }

    #[tokio::test]
    async fn test_open_then_close_round_trip() {
        let mock = MockExchange::new();
        mock.set_price("SOLUSDT", dec!(25)).await;

        mock.open_position("SOLUSDT", Side::Short, dec!(100))
            .await
            .unwrap();
        let positions = mock.fetch_positions().await.unwrap();
        assert_eq!(
            positions,
            vec![Position::new("SOLUSDT", Side::Short, dec!(4), dec!(25))]
        );

        mock.close_position("SOLUSDT", Side::Short, dec!(4))
            .await
            .unwrap();
        assert!(mock.positions().await.is_empty());
        assert_eq!(mock.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = MockExchange::new();
        mock.add_symbol("ETHUSDT", &[dec!(10)]).await;
        mock.fail_listing(true).await;
        mock.reject_orders("ETHUSDT").await;

        assert!(mock.list_tradable_symbols().await.is_err());
        assert!(matches!(
            mock.open_position("ETHUSDT", Side::Long, dec!(10)).await,
            Err(OrderError::Rejected { .. })
        ));
        assert!(mock.orders().await.is_empty());
    }
}
