//! Exchange integrations for the short bot.
//!
//! ## Bybit
//! REST connectivity for USDT linear perpetuals:
//! - Market data (instruments, klines, tickers)
//! - Account operations (positions, leverage, market orders)
//!
//! ## Mock
//! In-memory venue for unit tests.

mod client;
#[cfg(test)]
mod mock;
mod traits;
mod types;

pub use client::BybitClient;
#[cfg(test)]
pub use mock::{MockExchange, MockOrder};
pub use traits::*;
pub use types::*;
