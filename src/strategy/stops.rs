//! Stop-loss, profit-target and trailing-stop arithmetic.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Base stop distance as a fraction of entry (scaled by the stop multiplier)
const STOP_DISTANCE: Decimal = dec!(0.10);
/// Base target distance as a fraction of entry (scaled by the target multiplier)
const TARGET_DISTANCE: Decimal = dec!(0.25);
const TRAILING_ACTIVATION: Decimal = dec!(1.15);
/// Floor for any stop-loss level
const MIN_STOP: Decimal = dec!(0.05);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopLevels {
    pub stop_loss: Decimal,
    pub profit_target: Decimal,
    pub trailing_activation: Decimal,
}

pub fn calculate_stops(
    entry_price: Decimal,
    stop_multiplier: Decimal,
    target_multiplier: Decimal,
) -> StopLevels {
    let stop_loss = entry_price - entry_price * STOP_DISTANCE * stop_multiplier;
    let profit_target = entry_price + entry_price * TARGET_DISTANCE * target_multiplier;

    StopLevels {
        stop_loss: stop_loss.max(MIN_STOP),
        profit_target,
        trailing_activation: entry_price * TRAILING_ACTIVATION,
    }
}

/// Ratchet `highest` and return a trailing stop candidate.
///
/// No-op unless price is above entry. The candidate is only returned when it
/// locks in profit; callers keep `max(existing_stop, candidate)`.
pub fn update_trailing_stop(
    current_price: Decimal,
    entry_price: Decimal,
    highest: &mut Decimal,
    trailing_pct: Decimal,
) -> Option<Decimal> {
    if current_price <= entry_price {
        return None;
    }

    if current_price > *highest {
        *highest = current_price;
    }

    let candidate = *highest * (Decimal::ONE - trailing_pct);
    (candidate > entry_price).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_levels_scenario() {
        // 100 + 100 * 0.25 * 2
        let levels = calculate_stops(dec!(100), dec!(1), dec!(2));
        assert_eq!(levels.stop_loss, dec!(90.0));
        assert_eq!(levels.profit_target, dec!(150.0));
        assert_eq!(levels.trailing_activation, dec!(115.0));

        let levels = calculate_stops(dec!(100), dec!(1), dec!(1));
        assert_eq!(levels.profit_target, dec!(125.0));
    }

    #[test]
    fn test_stop_floor() {
        let levels = calculate_stops(dec!(0.05), dec!(1), dec!(2));
        assert_eq!(levels.stop_loss, dec!(0.05));

        // Multiplier large enough to push the raw stop negative
        let levels = calculate_stops(dec!(1), dec!(20), dec!(2));
        assert_eq!(levels.stop_loss, dec!(0.05));
    }

    #[test]
    fn test_trailing_ignored_at_or_below_entry() {
        let mut highest = dec!(100);
        assert_eq!(update_trailing_stop(dec!(100), dec!(100), &mut highest, dec!(0.08)), None);
        assert_eq!(update_trailing_stop(dec!(95), dec!(100), &mut highest, dec!(0.08)), None);
        assert_eq!(highest, dec!(100));
    }

    #[test]
    fn test_trailing_needs_to_clear_entry() {
        let mut highest = dec!(100);
        // 105 * 0.92 = 96.6 < entry
        assert_eq!(update_trailing_stop(dec!(105), dec!(100), &mut highest, dec!(0.08)), None);
        assert_eq!(highest, dec!(105));

        // 120 * 0.92 = 110.4
        let candidate = update_trailing_stop(dec!(120), dec!(100), &mut highest, dec!(0.08));
        assert_eq!(candidate, Some(dec!(110.40)));
    }

    #[test]
    fn test_trailing_stop_never_decreases() {
        let entry = dec!(100);
        let mut highest = entry;
        let mut stop = calculate_stops(entry, dec!(1), dec!(2)).stop_loss;

        let path = [dec!(101), dec!(110), dec!(108), dec!(115), dec!(112), dec!(120), dec!(119)];
        for price in path {
            let before = stop;
            if let Some(candidate) = update_trailing_stop(price, entry, &mut highest, dec!(0.08)) {
                stop = stop.max(candidate);
            }
            assert!(stop >= before, "stop fell from {} to {} at {}", before, stop, price);
        }
        assert_eq!(stop, dec!(110.40));
    }
}
