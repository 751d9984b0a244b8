//! Live reconciliation through an execution adapter.

use super::book::{PositionBook, ReconcileReport};
use super::plan::{plan, Decision, PriceQuotes};
use super::Reconciler;
use crate::error::{GatewayError, OrderError};
use crate::exchange::{ExecutionAdapter, Position};
use crate::strategy::{Target, TargetAllocation};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Mirrors exchange positions and places the orders a plan calls for.
///
/// Realized PnL is estimated from the exchange's average entry price and the
/// price quoted for the cycle, not from fills.
pub struct LiveReconciler {
    adapter: Arc<dyn ExecutionAdapter>,
    starting_capital: Decimal,
    realized_pnl: Decimal,
    order_pacing: Duration,
}

impl LiveReconciler {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        starting_capital: Decimal,
        order_pacing: Duration,
    ) -> Self {
        Self {
            adapter,
            starting_capital,
            realized_pnl: Decimal::ZERO,
            order_pacing,
        }
    }

    async fn pace(&self) {
        if !self.order_pacing.is_zero() {
            tokio::time::sleep(self.order_pacing).await;
        }
    }

    async fn close(&self, position: &Position) -> Result<(), OrderError> {
        let result = self
            .adapter
            .close_position(&position.symbol, position.side, position.size)
            .await;
        self.pace().await;
        result
    }

    async fn open(&self, symbol: &str, target: &Target) -> Result<(), OrderError> {
        let result = self
            .adapter
            .open_position(symbol, target.side, target.notional)
            .await;
        self.pace().await;
        result
    }

    /// Submit the orders for one decision.
    async fn submit(&self, decision: &Decision) -> Execution {
        let result = match decision {
            Decision::Hold { .. } => Ok(()),
            Decision::Close { position, .. } => self.close(position).await,
            Decision::Open { symbol, target, .. } => self.open(symbol, target).await,
            Decision::Reverse {
                previous, target, ..
            } => {
                if let Err(e) = self.close(previous).await {
                    return Execution::Failed(e);
                }
                if let Err(e) = self.open(&previous.symbol, target).await {
                    return Execution::OnlyClosed(e);
                }
                Ok(())
            }
        };

        match result {
            Ok(()) => Execution::Done,
            Err(e) => Execution::Failed(e),
        }
    }

    /// Record in `book` what actually reached the exchange.
    async fn execute(
        &self,
        book: &mut PositionBook,
        decision: Decision,
        report: &mut ReconcileReport,
    ) {
        let symbol = decision.symbol().to_string();
        let execution = self.submit(&decision).await;
        let (applied, failure) = match execution {
            Execution::Done => (Some(decision), None),
            Execution::OnlyClosed(e) => {
                // The old leg is gone even though the new one failed.
                let closed = match decision {
                    Decision::Reverse {
                        previous, price, ..
                    } => Decision::Close {
                        position: previous,
                        price,
                    },
                    other => other,
                };
                (Some(closed), Some(e))
            }
            Execution::Failed(e) => (None, Some(e)),
        };

        if let Some(decision) = applied {
            let action = book.apply(decision);
            action.log();
            report.actions.push(action);
        }
        if let Some(e) = failure {
            error!(%symbol, error = %e, "Order failed");
            report.failures.push((symbol, e));
        }
    }
}

/// How much of a decision reached the exchange.
enum Execution {
    Done,
    /// Reverse whose close filled but whose open did not
    OnlyClosed(OrderError),
    Failed(OrderError),
}

#[async_trait]
impl Reconciler for LiveReconciler {
    fn mode(&self) -> &'static str {
        "live"
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Position>, GatewayError> {
        let positions = self.adapter.fetch_positions().await?;
        Ok(positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect())
    }

    async fn reconcile(
        &mut self,
        holdings: BTreeMap<String, Position>,
        targets: &TargetAllocation,
        quotes: &PriceQuotes,
    ) -> ReconcileReport {
        warn!("LIVE TRADING - real orders will be placed");

        let plan = plan(&holdings, targets, quotes);
        let mut book = PositionBook::from_positions(holdings);
        let mut report = ReconcileReport {
            skipped: plan.skipped,
            ..Default::default()
        };

        for decision in plan.decisions {
            self.execute(&mut book, decision, &mut report).await;
        }

        report.realized_this_cycle = book.realized_pnl();
        report.positions_after = book.positions().clone();
        self.realized_pnl += book.realized_pnl();

        info!(
            orders_failed = report.failures.len(),
            realized_estimate = %self.realized_pnl.round_dp(2),
            "Live reconciliation complete"
        );
        report
    }

    fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    fn starting_capital(&self) -> Decimal {
        self.starting_capital
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockExchange, MockExecutionAdapter, MockOrder, Side};
    use crate::ledger::Action;
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn quotes(entries: &[(&str, Decimal)]) -> PriceQuotes {
        entries
            .iter()
            .map(|(s, p)| (s.to_string(), Ok(*p)))
            .collect()
    }

    fn holdings(positions: &[Position]) -> BTreeMap<String, Position> {
        positions
            .iter()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect()
    }

    fn live(adapter: impl ExecutionAdapter + 'static) -> LiveReconciler {
        LiveReconciler::new(Arc::new(adapter), dec!(1000), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_reverse_closes_before_opening() {
        let mut adapter = MockExecutionAdapter::new();
        let mut seq = Sequence::new();
        adapter
            .expect_close_position()
            .withf(|symbol, side, size| {
                symbol.to_string() == "SYM" && *side == Side::Short && *size == dec!(10)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_open_position()
            .withf(|symbol, side, notional| {
                symbol.to_string() == "SYM" && *side == Side::Long && *notional == dec!(100)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let mut reconciler = live(adapter);
        let previous = holdings(&[Position::new("SYM", Side::Short, dec!(10), dec!(5))]);
        let targets = TargetAllocation::from_entries(&[("SYM", Side::Long, dec!(100))]);

        let report = reconciler
            .reconcile(previous, &targets, &quotes(&[("SYM", dec!(4))]))
            .await;

        assert_eq!(report.realized_this_cycle, dec!(10));
        assert_eq!(reconciler.realized_pnl(), dec!(10));
        assert!(report.failures.is_empty());
        assert_eq!(report.positions_after["SYM"].side, Side::Long);
    }

    #[tokio::test]
    async fn test_failed_close_skips_reverse_open() {
        let mut adapter = MockExecutionAdapter::new();
        adapter.expect_close_position().times(1).returning(|symbol, _, _| {
            Err(OrderError::Rejected {
                symbol: symbol.to_string(),
                reason: "reduce-only rejected".to_string(),
            })
        });
        adapter.expect_open_position().never();

        let mut reconciler = live(adapter);
        let previous = holdings(&[Position::new("SYM", Side::Short, dec!(10), dec!(5))]);
        let targets = TargetAllocation::from_entries(&[("SYM", Side::Long, dec!(100))]);

        let report = reconciler
            .reconcile(previous.clone(), &targets, &quotes(&[("SYM", dec!(4))]))
            .await;

        assert!(report.actions.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.positions_after, previous);
        assert_eq!(reconciler.realized_pnl(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_failed_reverse_open_still_books_close() {
        let mut adapter = MockExecutionAdapter::new();
        adapter
            .expect_close_position()
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_open_position()
            .times(1)
            .returning(|symbol, _, _| Err(OrderError::NoPrice(symbol.to_string())));

        let mut reconciler = live(adapter);
        let previous = holdings(&[Position::new("SYM", Side::Short, dec!(10), dec!(5))]);
        let targets = TargetAllocation::from_entries(&[("SYM", Side::Long, dec!(100))]);

        let report = reconciler
            .reconcile(previous, &targets, &quotes(&[("SYM", dec!(4))]))
            .await;

        assert!(matches!(report.actions.as_slice(), [Action::Closed { .. }]));
        assert_eq!(report.failures.len(), 1);
        assert!(report.positions_after.is_empty());
        assert_eq!(reconciler.realized_pnl(), dec!(10));
    }

    #[tokio::test]
    async fn test_order_failure_does_not_stop_other_symbols() {
        let mock = MockExchange::new();
        for (symbol, price) in [("BTCUSDT", dec!(50000)), ("ETHUSDT", dec!(2000)), ("SOLUSDT", dec!(100))] {
            mock.set_price(symbol, price).await;
        }
        mock.set_position(Position::new("OLDUSDT", Side::Short, dec!(5), dec!(2)))
            .await;
        mock.set_price("OLDUSDT", dec!(1)).await;
        mock.reject_orders("ETHUSDT").await;

        let mut reconciler = live(mock.clone());
        let targets = TargetAllocation::from_entries(&[
            ("BTCUSDT", Side::Long, dec!(1000)),
            ("ETHUSDT", Side::Short, dec!(500)),
            ("SOLUSDT", Side::Short, dec!(500)),
        ]);
        let prices = quotes(&[
            ("BTCUSDT", dec!(50000)),
            ("ETHUSDT", dec!(2000)),
            ("SOLUSDT", dec!(100)),
            ("OLDUSDT", dec!(1)),
        ]);

        let holdings = reconciler.snapshot().await.unwrap();
        let report = reconciler.reconcile(holdings, &targets, &prices).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "ETHUSDT");
        assert_eq!(report.realized_this_cycle, dec!(5));

        let orders = mock.orders().await;
        assert_eq!(
            orders[0],
            MockOrder::Close {
                symbol: "OLDUSDT".to_string(),
                side: Side::Short,
                size: dec!(5),
            }
        );
        assert_eq!(orders.len(), 3);

        let on_exchange: Vec<String> = mock.positions().await.into_keys().collect();
        assert_eq!(on_exchange, vec!["BTCUSDT".to_string(), "SOLUSDT".to_string()]);
    }

    #[tokio::test]
    async fn test_held_positions_place_no_orders() {
        let mut adapter = MockExecutionAdapter::new();
        adapter.expect_close_position().never();
        adapter.expect_open_position().never();

        let mut reconciler = live(adapter);
        let previous = holdings(&[Position::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000))]);
        let targets = TargetAllocation::from_entries(&[("BTCUSDT", Side::Long, dec!(1000))]);

        let report = reconciler
            .reconcile(previous, &targets, &quotes(&[("BTCUSDT", dec!(51000))]))
            .await;

        assert_eq!(report.counts().held, 1);
        assert_eq!(reconciler.realized_pnl(), Decimal::ZERO);
    }
}
