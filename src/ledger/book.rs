//! Position state and PnL accounting.

use super::plan::{Decision, PriceQuotes, SkippedSymbol};
use crate::error::OrderError;
use crate::exchange::{Position, Side};
use crate::strategy::Target;
use crate::utils::safe_div;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::info;

/// What a decision did to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Opened {
        position: Position,
        notional: Decimal,
    },
    Held {
        position: Position,
    },
    Reversed {
        closed: Position,
        opened: Position,
        realized: Decimal,
    },
    Closed {
        position: Position,
        price: Decimal,
        realized: Decimal,
    },
}

impl Action {
    pub fn symbol(&self) -> &str {
        match self {
            Action::Opened { position, .. }
            | Action::Held { position }
            | Action::Closed { position, .. } => &position.symbol,
            Action::Reversed { opened, .. } => &opened.symbol,
        }
    }

    /// PnL booked by this action.
    pub fn realized(&self) -> Decimal {
        match self {
            Action::Reversed { realized, .. } | Action::Closed { realized, .. } => *realized,
            Action::Opened { .. } | Action::Held { .. } => Decimal::ZERO,
        }
    }

    pub fn log(&self) {
        match self {
            Action::Opened { position, notional } => info!(
                symbol = %position.symbol,
                side = %position.side,
                size = %position.size.round_dp(4),
                price = %position.entry_price,
                notional = %notional.round_dp(2),
                "OPEN"
            ),
            Action::Held { position } => info!(
                symbol = %position.symbol,
                side = %position.side,
                size = %position.size.round_dp(4),
                entry = %position.entry_price,
                "HOLD"
            ),
            Action::Reversed {
                closed,
                opened,
                realized,
            } => info!(
                symbol = %opened.symbol,
                from = %closed.side,
                to = %opened.side,
                pnl = %realized.round_dp(2),
                "REVERSE"
            ),
            Action::Closed {
                position,
                price,
                realized,
            } => info!(
                symbol = %position.symbol,
                side = %position.side,
                price = %price,
                pnl = %realized.round_dp(2),
                "CLOSE"
            ),
        }
    }
}

/// Open positions plus the running realized PnL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
    realized_pnl: Decimal,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book seeded with existing positions and no realized PnL.
    pub fn from_positions(positions: BTreeMap<String, Position>) -> Self {
        Self {
            positions,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    fn open_at(symbol: &str, target: &Target, price: Decimal) -> Position {
        Position::new(symbol, target.side, target.notional / price, price)
    }

    /// Apply one decision. This is the only way the book changes.
    pub fn apply(&mut self, decision: Decision) -> Action {
        match decision {
            Decision::Close { position, price } => {
                let realized = position.pnl_at(price);
                self.positions.remove(&position.symbol);
                self.realized_pnl += realized;
                Action::Closed {
                    position,
                    price,
                    realized,
                }
            }
            Decision::Hold { position } => Action::Held { position },
            Decision::Reverse {
                previous,
                target,
                price,
            } => {
                let realized = previous.pnl_at(price);
                let opened = Self::open_at(&previous.symbol, &target, price);
                self.positions
                    .insert(opened.symbol.clone(), opened.clone());
                self.realized_pnl += realized;
                Action::Reversed {
                    closed: previous,
                    opened,
                    realized,
                }
            }
            Decision::Open {
                symbol,
                target,
                price,
            } => {
                let position = Self::open_at(&symbol, &target, price);
                self.positions.insert(symbol, position.clone());
                Action::Opened {
                    position,
                    notional: target.notional,
                }
            }
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub actions: Vec<Action>,
    pub skipped: Vec<SkippedSymbol>,
    /// Orders the venue refused (live mode only)
    pub failures: Vec<(String, OrderError)>,
    pub realized_this_cycle: Decimal,
    pub positions_after: BTreeMap<String, Position>,
}

/// Number of actions of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub opened: usize,
    pub held: usize,
    pub reversed: usize,
    pub closed: usize,
}

impl ReconcileReport {
    pub fn counts(&self) -> ActionCounts {
        let mut counts = ActionCounts::default();
        for action in &self.actions {
            match action {
                Action::Opened { .. } => counts.opened += 1,
                Action::Held { .. } => counts.held += 1,
                Action::Reversed { .. } => counts.reversed += 1,
                Action::Closed { .. } => counts.closed += 1,
            }
        }
        counts
    }
}

/// Mark-to-market summary after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    pub starting_capital: Decimal,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub total_pnl: Decimal,
    pub equity: Decimal,
    pub open_positions: usize,
    /// Open positions with no usable price this cycle
    pub unmarked: Vec<String>,
}

impl Valuation {
    pub fn compute(
        starting_capital: Decimal,
        realized: Decimal,
        positions: &BTreeMap<String, Position>,
        quotes: &PriceQuotes,
    ) -> Self {
        let mut unrealized = Decimal::ZERO;
        let mut unmarked = Vec::new();

        for (symbol, position) in positions {
            match quotes.get(symbol) {
                Some(Ok(price)) => unrealized += position.pnl_at(*price),
                _ => unmarked.push(symbol.clone()),
            }
        }

        let total_pnl = realized + unrealized;
        Self {
            starting_capital,
            realized,
            unrealized,
            total_pnl,
            equity: starting_capital + total_pnl,
            open_positions: positions.len(),
            unmarked,
        }
    }

    /// Total PnL as a percentage of starting capital.
    pub fn return_pct(&self) -> Decimal {
        safe_div(self.total_pnl, self.starting_capital) * dec!(100)
    }

    pub fn log(&self) {
        info!(
            realized = %self.realized.round_dp(2),
            unrealized = %self.unrealized.round_dp(2),
            total = %self.total_pnl.round_dp(2),
            equity = %self.equity.round_dp(2),
            return_pct = %self.return_pct().round_dp(2),
            open_positions = self.open_positions,
            unmarked = self.unmarked.len(),
            "Portfolio valuation"
        );
    }
}

/// Exposure per side, for reporting.
pub fn exposure_by_side(positions: &BTreeMap<String, Position>) -> (Decimal, Decimal) {
    positions
        .values()
        .fold((Decimal::ZERO, Decimal::ZERO), |(long, short), p| match p.side {
            Side::Long => (long + p.entry_notional(), short),
            Side::Short => (long, short + p.entry_notional()),
        })
}
