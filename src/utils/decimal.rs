//! Decimal arithmetic utilities for price calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round to the nearest multiple of a quoting interval (e.g., 5 for MES strikes).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Signed rate of change from `first` to `last`, in percent.
pub fn rate_of_change_pct(first: Decimal, last: Decimal) -> Decimal {
    safe_div(last - first, first) * dec!(100)
}

/// Midpoint between bid and ask.
pub fn mid_price(bid: Decimal, ask: Decimal) -> Decimal {
    (bid + ask) / dec!(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(5012.4), dec!(5)), dec!(5010));
        assert_eq!(round_to_tick(dec!(5013.0), dec!(5)), dec!(5015));
        assert_eq!(round_to_tick(dec!(17524.9), dec!(50)), dec!(17500));
        assert_eq!(round_to_tick(dec!(123.45), Decimal::ZERO), dec!(123.45));
    }

    #[test]
    fn test_rate_of_change() {
        assert_eq!(rate_of_change_pct(dec!(100), dec!(100.25)), dec!(0.25));
        assert_eq!(rate_of_change_pct(dec!(100), dec!(99.85)), dec!(-0.15));
        // Zero base never divides
        assert_eq!(rate_of_change_pct(Decimal::ZERO, dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_mid_price() {
        assert_eq!(mid_price(dec!(5000.00), dec!(5000.50)), dec!(5000.25));
    }
}
