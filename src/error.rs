//! Error taxonomy for the rebalancing engine.
//!
//! Per-symbol failures (`DataUnavailable`, `OrderError`) never abort a cycle;
//! they are carried in reports so callers can see which symbols were skipped
//! and why. Bulk failures (`GatewayError`, `AllocationError`) abort the current
//! cycle through `CycleError` and leave the ledger untouched.

use thiserror::Error;

/// Bulk failure talking to the market data gateway or the account endpoints.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("exchange rejected request (retCode {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// A single open/close order could not be placed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("order for {symbol} rejected: {reason}")]
    Rejected { symbol: String, reason: String },
    #[error("no instrument metadata for {0}")]
    UnknownInstrument(String),
    #[error("no usable price for {0}")]
    NoPrice(String),
    #[error("order quantity for {symbol} rounds to zero")]
    ZeroQuantity { symbol: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Why a symbol's price could not be used this cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataUnavailable {
    #[error("price unavailable")]
    PriceUnavailable,
    #[error("price fetch failed: {0}")]
    FetchFailed(String),
}

/// Target computation could not produce a full basket.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("insufficient universe: {available} eligible alts, need {required}")]
    InsufficientUniverse { available: usize, required: usize },
    #[error("capital must be positive")]
    InvalidCapital,
    #[error("number of shorts must be at least 1")]
    NoShorts,
}

/// Reasons a rebalance cycle stopped before reconciliation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
