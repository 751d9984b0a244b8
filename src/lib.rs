//! # High-Volatility Short Bot
//!
//! Holds a long position in one reference asset on Bybit USDT perpetuals and
//! funds it with an equal-weight short basket of the most volatile alts,
//! rebalanced every 4 hours UTC.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Typed failures for gateway, orders, allocation and cycles
//! - `exchange`: Bybit REST client, the gateway/adapter traits and a mock venue
//! - `strategy`: Volatility ranking and target allocation
//! - `ledger`: Reconciliation of holdings against targets, paper and live
//! - `scheduler`: The 4-hour rebalance loop
//! - `utils`: Shared decimal helpers

pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod scheduler;
pub mod strategy;
pub mod utils;

pub use config::Config;
