//! Planning step: previous holdings + targets + prices → decisions.
//!
//! Pure and synchronous. Both the paper ledger and the live reconciler run
//! the same plan and differ only in how decisions are applied.

use crate::error::{DataUnavailable, GatewayError};
use crate::exchange::{MarketDataGateway, Position};
use crate::strategy::{Target, TargetAllocation};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Current price per symbol, or why it is unusable this cycle.
pub type PriceQuotes = HashMap<String, Result<Decimal, DataUnavailable>>;

/// Normalize a gateway price lookup. Zero or absent means unavailable.
pub fn quote_from(price: Result<Option<Decimal>, GatewayError>) -> Result<Decimal, DataUnavailable> {
    match price {
        Ok(Some(p)) if p > Decimal::ZERO => Ok(p),
        Ok(_) => Err(DataUnavailable::PriceUnavailable),
        Err(e) => Err(DataUnavailable::FetchFailed(e.to_string())),
    }
}

/// Fetch one quote per symbol.
pub async fn fetch_quotes<'a>(
    gateway: &dyn MarketDataGateway,
    symbols: impl IntoIterator<Item = &'a String>,
) -> PriceQuotes {
    let symbols: BTreeSet<&String> = symbols.into_iter().collect();
    let lookups = symbols.into_iter().map(|symbol| async move {
        let quote = quote_from(gateway.get_current_price(symbol).await);
        if let Err(reason) = &quote {
            warn!(%symbol, %reason, "No usable price");
        }
        (symbol.clone(), quote)
    });
    join_all(lookups).await.into_iter().collect()
}

/// One transition of the reconciliation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Held but no longer targeted.
    Close { position: Position, price: Decimal },
    /// Held on the targeted side.
    Hold { position: Position },
    /// Held on the opposite side of the target.
    Reverse {
        previous: Position,
        target: Target,
        price: Decimal,
    },
    /// Targeted but not held.
    Open {
        symbol: String,
        target: Target,
        price: Decimal,
    },
}

impl Decision {
    pub fn symbol(&self) -> &str {
        match self {
            Decision::Close { position, .. } | Decision::Hold { position } => &position.symbol,
            Decision::Reverse { previous, .. } => &previous.symbol,
            Decision::Open { symbol, .. } => symbol,
        }
    }
}

/// A symbol left untouched this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: DataUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Closes first, then targeted symbols in symbol order.
    pub decisions: Vec<Decision>,
    pub skipped: Vec<SkippedSymbol>,
}

/// Non-positive quotes are treated like missing ones.
fn price_for(quotes: &PriceQuotes, symbol: &str) -> Result<Decimal, DataUnavailable> {
    match quotes.get(symbol) {
        Some(Ok(price)) if *price > Decimal::ZERO => Ok(*price),
        Some(Err(reason)) => Err(reason.clone()),
        _ => Err(DataUnavailable::PriceUnavailable),
    }
}

/// Decide the action for every symbol in `previous ∪ targets`.
///
/// Symbols without a usable price are skipped and their positions retained.
pub fn plan(
    previous: &BTreeMap<String, Position>,
    targets: &TargetAllocation,
    quotes: &PriceQuotes,
) -> Plan {
    let mut plan = Plan::default();

    for (symbol, position) in previous {
        if targets.contains(symbol) {
            continue;
        }
        match price_for(quotes, symbol) {
            Ok(price) => plan.decisions.push(Decision::Close {
                position: position.clone(),
                price,
            }),
            Err(reason) => plan.skipped.push(SkippedSymbol {
                symbol: symbol.clone(),
                reason,
            }),
        }
    }

    for (symbol, target) in targets.iter() {
        let price = match price_for(quotes, symbol) {
            Ok(price) => price,
            Err(reason) => {
                plan.skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason,
                });
                continue;
            }
        };

        let decision = match previous.get(symbol) {
            Some(position) if position.side == target.side => Decision::Hold {
                position: position.clone(),
            },
            Some(position) => Decision::Reverse {
                previous: position.clone(),
                target: *target,
                price,
            },
            None => Decision::Open {
                symbol: symbol.clone(),
                target: *target,
                price,
            },
        };
        plan.decisions.push(decision);
    }

    plan
}
