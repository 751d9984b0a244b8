//! Shared utilities.

mod decimal;

pub use decimal::{round_to_step, safe_div, to_f64};
