// =============================================================================
// Fixed-precision rounding for prices and token quantities
// =============================================================================
//
// Pump.fun prices are tiny (1e-8 SOL per token is common) so rounding is done
// in decimal space rather than by scaling an f64.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round `value` to `dp` fractional digits. Values `Decimal` cannot represent
/// are returned unchanged.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(dp))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Round a raw price to the configured precision.
pub fn round_price(raw: f64, dp: u32) -> f64 {
    round_dp(raw, dp)
}

/// Round a token quantity to the configured precision. Values at or below
/// zero collapse to exactly zero.
pub fn round_quantity(quantity: f64, dp: u32) -> f64 {
    if quantity <= 0.0 {
        return 0.0;
    }
    Decimal::from_f64_retain(quantity)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(quantity)
}
