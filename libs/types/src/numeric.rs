//! Decimal helpers for prices
//!
//! Prices travel as JSON floats but are carried internally as `Decimal` so
//! the 2-dp rounding applied on every aggregate update is exact. Rounding is
//! half away from zero, which for the non-negative prices the pipeline
//! accepts is the usual half-up rule.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept on every emitted average price.
pub const PRICE_DP: u32 = 2;

/// Round a price to [`PRICE_DP`] decimal places, half away from zero.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a wire float to a Decimal.
///
/// Returns None for NaN, infinities and values outside Decimal's range.
pub fn price_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}
