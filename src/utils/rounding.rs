//! Fixed-decimal rounding for prices and balances.

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};

/// Decimal places kept on every planned price.
pub const PRICE_DECIMALS: i64 = 5;
/// Decimal places kept on simulated balances.
pub const CASH_DECIMALS: i64 = 2;

/// Round half away from zero to `places` decimals, working on the shortest
/// decimal form of `value`. Non-finite input is returned as is.
pub fn round_to(value: f64, places: i64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    value
        .to_string()
        .parse::<BigDecimal>()
        .ok()
        .map(|d| d.with_scale_round(places, RoundingMode::HalfUp))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

#[inline]
pub fn round_price(value: f64) -> f64 {
    round_to(value, PRICE_DECIMALS)
}

#[inline]
pub fn round_cash(value: f64) -> f64 {
    round_to(value, CASH_DECIMALS)
}

/// Number of digits after the decimal point in the shortest representation.
pub fn decimal_places(value: f64) -> usize {
    let s = value.to_string();
    s.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}
