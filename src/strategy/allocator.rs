//! Target allocation: long the reference asset, short the most volatile alts.

use super::ranker::VolatilityScore;
use crate::error::AllocationError;
use crate::exchange::Side;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// Desired exposure for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub side: Side,
    /// USDT value of the position
    pub notional: Decimal,
}

/// Symbol → target, iterated in symbol order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetAllocation {
    targets: BTreeMap<String, Target>,
}

impl TargetAllocation {
    pub fn get(&self, symbol: &str) -> Option<&Target> {
        self.targets.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.targets.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Target)> {
        self.targets.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.targets.keys()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The single long leg.
    pub fn long(&self) -> Option<(&String, &Target)> {
        self.targets.iter().find(|(_, t)| t.side == Side::Long)
    }

    pub fn shorts(&self) -> impl Iterator<Item = (&String, &Target)> {
        self.targets.iter().filter(|(_, t)| t.side == Side::Short)
    }

    #[cfg(test)]
    pub(crate) fn from_entries(entries: &[(&str, Side, Decimal)]) -> Self {
        Self {
            targets: entries
                .iter()
                .map(|(symbol, side, notional)| {
                    (
                        symbol.to_string(),
                        Target {
                            side: *side,
                            notional: *notional,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Build the target allocation from a ranking.
///
/// The reference asset is held long with the full `capital`; the first
/// `n_shorts` ranked alts are shorted with `capital / n_shorts` each. Entries
/// for the reference asset or repeated symbols are ignored. Fewer than
/// `n_shorts` eligible alts yields `InsufficientUniverse` and no allocation.
pub fn compute_targets(
    ranked: &[VolatilityScore],
    reference_symbol: &str,
    capital: Decimal,
    n_shorts: usize,
) -> Result<TargetAllocation, AllocationError> {
    if capital <= Decimal::ZERO {
        return Err(AllocationError::InvalidCapital);
    }
    if n_shorts == 0 {
        return Err(AllocationError::NoShorts);
    }

    let mut seen = HashSet::new();
    let selected: Vec<&str> = ranked
        .iter()
        .map(|s| s.symbol.as_str())
        .filter(|symbol| *symbol != reference_symbol && seen.insert(*symbol))
        .take(n_shorts)
        .collect();

    if selected.len() < n_shorts {
        return Err(AllocationError::InsufficientUniverse {
            available: selected.len(),
            required: n_shorts,
        });
    }

    let short_notional = capital / Decimal::from(n_shorts);
    let mut targets = BTreeMap::new();
    targets.insert(
        reference_symbol.to_string(),
        Target {
            side: Side::Long,
            notional: capital,
        },
    );
    for symbol in selected {
        targets.insert(
            symbol.to_string(),
            Target {
                side: Side::Short,
                notional: short_notional,
            },
        );
    }

    info!(
        long = %reference_symbol,
        long_notional = %capital,
        shorts = n_shorts,
        short_notional = %short_notional,
        "Computed target allocation"
    );

    Ok(TargetAllocation { targets })
}
