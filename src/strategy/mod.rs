//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Ranking alts by realized volatility
//! - Turning a ranking into a long/short target allocation

mod allocator;
mod ranker;

pub use allocator::{compute_targets, Target, TargetAllocation};
pub use ranker::{
    realized_volatility, RankerConfig, Ranking, Unrankable, VolatilityRanker, VolatilityScore,
};
