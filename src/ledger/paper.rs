//! Simulated ledger for paper trading.

use super::book::{PositionBook, ReconcileReport};
use super::plan::{plan, PriceQuotes};
use super::Reconciler;
use crate::error::GatewayError;
use crate::exchange::Position;
use crate::strategy::TargetAllocation;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

/// In-memory positions filled at the quoted price.
///
/// Created empty at start-up and never persisted.
#[derive(Debug, Clone)]
pub struct PaperLedger {
    book: PositionBook,
    starting_capital: Decimal,
}

impl PaperLedger {
    pub fn new(starting_capital: Decimal) -> Self {
        Self {
            book: PositionBook::new(),
            starting_capital,
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Reconcile the ledger's own positions against `targets`.
    pub fn apply_targets(&mut self, targets: &TargetAllocation, quotes: &PriceQuotes) -> ReconcileReport {
        let realized_before = self.book.realized_pnl();
        let plan = plan(self.book.positions(), targets, quotes);

        let mut report = ReconcileReport {
            skipped: plan.skipped,
            ..Default::default()
        };
        for decision in plan.decisions {
            let action = self.book.apply(decision);
            action.log();
            report.actions.push(action);
        }

        report.realized_this_cycle = self.book.realized_pnl() - realized_before;
        report.positions_after = self.book.positions().clone();
        info!(
            realized_pnl = %self.book.realized_pnl().round_dp(2),
            open_positions = self.book.len(),
            "Paper reconciliation complete"
        );
        report
    }
}

#[async_trait]
impl Reconciler for PaperLedger {
    fn mode(&self) -> &'static str {
        "paper"
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Position>, GatewayError> {
        Ok(self.book.positions().clone())
    }

    /// The paper book is the only source of holdings, so the snapshot passed
    /// in is always its own state.
    async fn reconcile(
        &mut self,
        _holdings: BTreeMap<String, Position>,
        targets: &TargetAllocation,
        quotes: &PriceQuotes,
    ) -> ReconcileReport {
        self.apply_targets(targets, quotes)
    }

    fn realized_pnl(&self) -> Decimal {
        self.book.realized_pnl()
    }

    fn starting_capital(&self) -> Decimal {
        self.starting_capital
    }
}
