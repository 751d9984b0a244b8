//! Bybit v5 REST API client.

use crate::config::BybitConfig;
use crate::error::{GatewayError, OrderError};
use crate::exchange::traits::{Candle, ExecutionAdapter, MarketDataGateway, Position, Side};
use crate::exchange::types::*;
use crate::utils::round_to_step;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW_MS: u64 = 5000;
const INSTRUMENTS_PAGE_LIMIT: &str = "1000";
/// retCode returned by set-leverage when the value is already in place.
const LEVERAGE_NOT_MODIFIED: i64 = 110043;

/// Bybit API client for USDT linear perpetuals.
pub struct BybitClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    candle_interval: String,
    leverage: u8,
    /// Lot filters learned from instrument metadata
    lot_filters: RwLock<HashMap<String, LotSizeFilter>>,
}

impl BybitClient {
    /// Create a new Bybit client from configuration.
    pub fn new(config: &BybitConfig) -> Result<Self> {
        let base_url = if config.testnet {
            TESTNET_URL
        } else {
            MAINNET_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(config: &BybitConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            candle_interval: "240".to_string(),
            leverage: 1,
            lot_filters: RwLock::new(HashMap::new()),
        })
    }

    /// Kline interval used by [`MarketDataGateway::get_candles`].
    pub fn with_candle_interval(mut self, interval: impl Into<String>) -> Self {
        self.candle_interval = interval.into();
        self
    }

    /// Leverage applied before every new position.
    pub fn with_leverage(mut self, leverage: u8) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.
    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW_MS.to_string().as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn query_string(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Unwrap the v5 envelope, turning non-zero retCodes into errors.
    fn into_result<T>(response: ApiResponse<T>) -> Result<T> {
        if response.ret_code != 0 {
            return Err(GatewayError::Rejected {
                code: response.ret_code,
                message: response.ret_msg,
            }
            .into());
        }
        response
            .result
            .ok_or_else(|| GatewayError::Malformed("missing result".to_string()).into())
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse<T>> {
        let url = format!("{}{}?{}", self.base_url, path, Self::query_string(params));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse<T>> {
        let query = Self::query_string(params);
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, &query);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string())
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    async fn post_signed<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        let payload = serde_json::to_string(body).context("Failed to encode request body")?;
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send POST {}", path))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    // ==================== Market Data (Public) ====================

    /// Get metadata for every linear instrument, following pagination.
    #[instrument(skip(self))]
    pub async fn get_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        let mut instruments = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("category", LINEAR.to_string()),
                ("limit", INSTRUMENTS_PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let page: InstrumentsPage =
                Self::into_result(self.get_public("/v5/market/instruments-info", &params).await?)?;
            instruments.extend(page.list);

            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                break;
            }
            cursor = page.next_page_cursor;
        }

        self.remember_lot_filters(&instruments).await;
        debug!(count = instruments.len(), "Fetched linear instruments");
        Ok(instruments)
    }

    async fn remember_lot_filters(&self, instruments: &[InstrumentInfo]) {
        let mut filters = self.lot_filters.write().await;
        for instrument in instruments {
            if let Some(filter) = instrument.lot_size_filter {
                filters.insert(instrument.symbol.clone(), filter);
            }
        }
    }

    /// Lot filter for a symbol, fetched on first use.
    async fn lot_filter(&self, symbol: &str) -> Result<Option<LotSizeFilter>> {
        if let Some(filter) = self.lot_filters.read().await.get(symbol) {
            return Ok(Some(*filter));
        }

        let params = [("category", LINEAR.to_string()), ("symbol", symbol.to_string())];
        let page: InstrumentsPage =
            Self::into_result(self.get_public("/v5/market/instruments-info", &params).await?)?;
        self.remember_lot_filters(&page.list).await;

        Ok(self.lot_filters.read().await.get(symbol).copied())
    }

    /// Get the most recent `limit` klines for a symbol, oldest first.
    #[instrument(skip(self))]
    pub async fn get_klines(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let params = [
            ("category", LINEAR.to_string()),
            ("symbol", symbol.to_string()),
            ("interval", self.candle_interval.clone()),
            ("limit", limit.to_string()),
        ];
        let result: KlineResult =
            Self::into_result(self.get_public("/v5/market/kline", &params).await?)?;
        Ok(result.into_candles())
    }

    /// Get the ticker for a symbol.
    #[instrument(skip(self))]
    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        let params = [("category", LINEAR.to_string()), ("symbol", symbol.to_string())];
        let result: TickersResult =
            Self::into_result(self.get_public("/v5/market/tickers", &params).await?)?;
        Ok(result.list.into_iter().find(|t| t.symbol == symbol))
    }

    // ==================== Account (Authenticated) ====================

    /// Get open USDT-settled positions.
    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let mut positions = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("category", LINEAR.to_string()),
                ("settleCoin", "USDT".to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let page: PositionsPage =
                Self::into_result(self.get_signed("/v5/position/list", &params).await?)?;
            positions.extend(page.list.iter().filter_map(PositionInfo::to_position));

            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                break;
            }
            cursor = page.next_page_cursor;
        }

        Ok(positions)
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a new order.
    #[instrument(skip(self))]
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        debug!("Placing order: {:?}", order);
        Self::into_result(self.post_signed("/v5/order/create", order).await?)
    }

    /// Set leverage for a symbol. An unchanged value is not an error.
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        let request = SetLeverageRequest::new(symbol, leverage);
        let response: ApiResponse<serde_json::Value> =
            self.post_signed("/v5/position/set-leverage", &request).await?;

        if response.ret_code == LEVERAGE_NOT_MODIFIED {
            return Ok(());
        }
        Self::into_result(response).map(|_| ())
    }
}

/// Map an internal error onto the gateway taxonomy.
fn to_gateway_error(error: anyhow::Error) -> GatewayError {
    match error.downcast::<GatewayError>() {
        Ok(gateway) => gateway,
        Err(other) => GatewayError::Transport(format!("{:#}", other)),
    }
}

fn to_order_error(symbol: &str, error: anyhow::Error) -> OrderError {
    match to_gateway_error(error) {
        GatewayError::Rejected { code, message } => OrderError::Rejected {
            symbol: symbol.to_string(),
            reason: format!("retCode {}: {}", code, message),
        },
        other => OrderError::Gateway(other),
    }
}

#[async_trait]
impl MarketDataGateway for BybitClient {
    async fn list_tradable_symbols(&self) -> Result<BTreeSet<String>, GatewayError> {
        let instruments = self.get_instruments().await.map_err(to_gateway_error)?;
        let symbols: BTreeSet<String> = instruments
            .into_iter()
            .filter(InstrumentInfo::is_tradable_usdt_perp)
            .map(|i| i.symbol)
            .collect();

        info!(count = symbols.len(), "Found active USDT perps");
        Ok(symbols)
    }

    async fn get_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>, GatewayError> {
        self.get_klines(symbol, limit)
            .await
            .map_err(to_gateway_error)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError> {
        let ticker = self.get_ticker(symbol).await.map_err(to_gateway_error)?;
        Ok(ticker.and_then(|t| t.mark_price()))
    }
}

#[async_trait]
impl ExecutionAdapter for BybitClient {
    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError> {
        self.get_positions().await.map_err(to_gateway_error)
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
    ) -> Result<(), OrderError> {
        let order = OrderRequest::market(symbol, OrderSide::to_close(side), size, true);
        let result = self
            .place_order(&order)
            .await
            .map_err(|e| to_order_error(symbol, e))?;

        info!(%symbol, %side, %size, order_id = %result.order_id, "Closed position");
        Ok(())
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        notional: Decimal,
    ) -> Result<(), OrderError> {
        self.set_leverage(symbol, self.leverage)
            .await
            .map_err(|e| to_order_error(symbol, e))?;

        let filter = self
            .lot_filter(symbol)
            .await
            .map_err(|e| to_order_error(symbol, e))?
            .ok_or_else(|| OrderError::UnknownInstrument(symbol.to_string()))?;

        let price = self
            .get_current_price(symbol)
            .await?
            .ok_or_else(|| OrderError::NoPrice(symbol.to_string()))?;

        let quantity = round_to_step(notional / price, filter.qty_step).max(filter.min_order_qty);
        if quantity <= Decimal::ZERO {
            warn!(%symbol, %notional, %price, "Order quantity rounds to zero");
            return Err(OrderError::ZeroQuantity {
                symbol: symbol.to_string(),
            });
        }

        let order = OrderRequest::market(symbol, OrderSide::to_open(side), quantity, false);
        let result = self
            .place_order(&order)
            .await
            .map_err(|e| to_order_error(symbol, e))?;

        info!(
            %symbol,
            %side,
            %quantity,
            %notional,
            order_id = %result.order_id,
            "Opened position"
        );
        Ok(())
    }
}
