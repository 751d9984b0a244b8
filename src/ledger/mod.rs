//! Position reconciliation ledger.
//!
//! A cycle hands the ledger the previous holdings, the new target allocation
//! and one price per symbol. The ledger plans one transition per symbol
//! (OPEN / HOLD / REVERSE / CLOSE), applies them closes-first, and keeps the
//! running realized PnL.
//!
//! - [`PaperLedger`] owns simulated positions; applying a decision is the fill.
//! - [`LiveReconciler`] mirrors positions from the exchange and turns decisions
//!   into orders through an [`ExecutionAdapter`](crate::exchange::ExecutionAdapter).

mod book;
mod live;
mod paper;
mod plan;

pub use book::{exposure_by_side, Action, ActionCounts, PositionBook, ReconcileReport, Valuation};
pub use live::LiveReconciler;
pub use paper::PaperLedger;
pub use plan::{fetch_quotes, plan, quote_from, Decision, Plan, PriceQuotes, SkippedSymbol};

use crate::error::GatewayError;
use crate::exchange::Position;
use crate::strategy::TargetAllocation;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Owner of position state for one trading mode.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// "paper" or "live".
    fn mode(&self) -> &'static str;

    /// Holdings at the start of a cycle.
    async fn snapshot(&self) -> Result<BTreeMap<String, Position>, GatewayError>;

    /// Bring `holdings` in line with `targets`.
    ///
    /// Per-symbol problems (missing prices, refused orders) are reported, never
    /// raised.
    async fn reconcile(
        &mut self,
        holdings: BTreeMap<String, Position>,
        targets: &TargetAllocation,
        quotes: &PriceQuotes,
    ) -> ReconcileReport;

    /// Realized PnL accumulated since start.
    fn realized_pnl(&self) -> Decimal;

    fn starting_capital(&self) -> Decimal;
}
