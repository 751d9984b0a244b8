//! Type definitions for Bybit v5 API requests and responses.

use super::traits::{Candle, Position, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Product category used for every request (USDT linear perpetuals).
pub const LINEAR: &str = "linear";

/// Envelope wrapping every v5 response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// One page of `/v5/market/instruments-info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentsPage {
    #[serde(default)]
    pub list: Vec<InstrumentInfo>,
    #[serde(default)]
    pub next_page_cursor: String,
}

/// Contract metadata for one symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub quote_coin: String,
    pub lot_size_filter: Option<LotSizeFilter>,
}

impl InstrumentInfo {
    /// Active USDT-margined perpetual.
    pub fn is_tradable_usdt_perp(&self) -> bool {
        self.quote_coin == "USDT"
            && self.status == "Trading"
            && self.contract_type == "LinearPerpetual"
    }
}

/// Quantity constraints for order sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty_step: Decimal,
}

/// Result of `/v5/market/kline`: rows are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

impl KlineResult {
    /// Convert raw rows `[start, open, high, low, close, volume, turnover]`
    /// into ascending candles. Rows that do not parse are dropped.
    pub fn into_candles(self) -> Vec<Candle> {
        let mut candles: Vec<Candle> = self
            .list
            .iter()
            .filter_map(|row| {
                let start_ms: i64 = row.first()?.parse().ok()?;
                let close = Decimal::from_str(row.get(4)?).ok()?;
                let timestamp = DateTime::<Utc>::from_timestamp_millis(start_ms)?;
                Some(Candle::new(timestamp, close))
            })
            .collect();
        candles.sort_by_key(|c| c.timestamp);
        candles
    }
}

/// Result of `/v5/market/tickers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickersResult {
    #[serde(default)]
    pub list: Vec<Ticker>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    #[serde(default)]
    pub mark_price: String,
}

impl Ticker {
    /// Positive mark price, if the venue quoted one.
    pub fn mark_price(&self) -> Option<Decimal> {
        Decimal::from_str(&self.mark_price)
            .ok()
            .filter(|p| *p > Decimal::ZERO)
    }
}

/// Result of `/v5/position/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsPage {
    #[serde(default)]
    pub list: Vec<PositionInfo>,
    #[serde(default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// "Buy", "Sell", or empty when flat
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
}

impl PositionInfo {
    /// Normalized position, or `None` for flat/unknown entries and entries
    /// without a usable average entry price.
    pub fn to_position(&self) -> Option<Position> {
        let side = match self.side.as_str() {
            "Buy" => Side::Long,
            "Sell" => Side::Short,
            _ => return None,
        };
        let size = Decimal::from_str(&self.size).ok()?;
        if size <= Decimal::ZERO {
            return None;
        }
        let entry_price = match Decimal::from_str(&self.avg_price) {
            Ok(price) if price > Decimal::ZERO => price,
            _ => {
                warn!(
                    symbol = %self.symbol,
                    avg_price = %self.avg_price,
                    "Position has no usable entry price, ignoring it"
                );
                return None;
            }
        };
        Some(Position::new(self.symbol.clone(), side, size, entry_price))
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side of the order that opens a position in `side`.
    pub fn to_open(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that flattens a position in `side`.
    pub fn to_close(side: Side) -> Self {
        Self::to_open(side.opposite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

/// Body of `/v5/order/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: String,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, qty: Decimal, reduce_only: bool) -> Self {
        Self {
            category: LINEAR.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty: qty.normalize().to_string(),
            reduce_only,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    #[serde(default)]
    pub order_id: String,
}

/// Body of `/v5/position/set-leverage`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub category: String,
    pub symbol: String,
    pub buy_leverage: String,
    pub sell_leverage: String,
}

impl SetLeverageRequest {
    pub fn new(symbol: &str, leverage: u8) -> Self {
        Self {
            category: LINEAR.to_string(),
            symbol: symbol.to_string(),
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kline_rows_become_ascending_candles() {
        let result = KlineResult {
            list: vec![
                vec!["1700014400000".into(), "1".into(), "1".into(), "1".into(), "102".into()],
                vec!["1700000000000".into(), "1".into(), "1".into(), "1".into(), "100".into()],
                vec!["garbage".into()],
            ],
        };
        let candles = result.into_candles();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(100));
        assert_eq!(candles[1].close, dec!(102));
        assert!(candles[0].timestamp < candles[1].timestamp);
    }

    #[test]
    fn test_flat_position_is_ignored() {
        let flat = PositionInfo {
            symbol: "ETHUSDT".into(),
            side: String::new(),
            size: "0".into(),
            avg_price: "0".into(),
        };
        assert!(flat.to_position().is_none());

        let short = PositionInfo {
            symbol: "ETHUSDT".into(),
            side: "Sell".into(),
            size: "1.5".into(),
            avg_price: "2000".into(),
        };
        let position = short.to_position().unwrap();
        assert_eq!(position.side, Side::Short);
        assert_eq!(position.size, dec!(1.5));
        assert_eq!(position.entry_price, dec!(2000));
    }

    #[test]
    fn test_position_without_entry_price_is_ignored() {
        for avg_price in ["", "abc", "0"] {
            let info = PositionInfo {
                symbol: "ETHUSDT".into(),
                side: "Sell".into(),
                size: "1.5".into(),
                avg_price: avg_price.into(),
            };
            assert!(info.to_position().is_none(), "avg_price {avg_price:?}");
        }
    }

    #[test]
    fn test_close_side_is_opposite_of_open() {
        assert_eq!(OrderSide::to_open(Side::Short), OrderSide::Sell);
        assert_eq!(OrderSide::to_close(Side::Short), OrderSide::Buy);
        assert_eq!(OrderSide::to_close(Side::Long), OrderSide::Sell);
    }

    #[test]
    fn test_order_request_serializes_camel_case() {
        let order = OrderRequest::market("SOLUSDT", OrderSide::Sell, dec!(1.50), true);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderType"], "Market");
        assert_eq!(json["reduceOnly"], true);
        assert_eq!(json["qty"], "1.5");
        assert_eq!(json["side"], "Sell");
    }
}
