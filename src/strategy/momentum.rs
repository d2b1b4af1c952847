//! Short-term momentum and reversal classification.
//!
//! Pure functions over a price window. Reversal checks compare the rate of
//! change of the latest five points against the five before them and take
//! precedence over trend continuation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;

use crate::utils::decimal::{rate_of_change_pct, safe_div};

/// Default number of points the classifier needs.
pub const DEFAULT_PERIOD: usize = 20;

/// Points needed before reversal detection is attempted.
const REVERSAL_MIN_POINTS: usize = 10;
const SUB_WINDOW: usize = 5;

const TREND_ROC: Decimal = dec!(0.15);
const BULLISH_SCORE: Decimal = dec!(0.55);
const BEARISH_SCORE: Decimal = dec!(0.45);
const REVERSAL_PRIOR_ROC: Decimal = dec!(0.1);
const REVERSAL_RECENT_ROC: Decimal = dec!(0.2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumSignal {
    Bullish,
    Bearish,
    ReversalUp,
    ReversalDown,
    Neutral,
}

impl fmt::Display for MomentumSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MomentumSignal::Bullish => "BULLISH",
            MomentumSignal::Bearish => "BEARISH",
            MomentumSignal::ReversalUp => "REVERSAL_UP",
            MomentumSignal::ReversalDown => "REVERSAL_DOWN",
            MomentumSignal::Neutral => "NEUTRAL",
        };
        write!(f, "{}", label)
    }
}

/// Signal plus the numeric inputs that produced it, for audit logging.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumReading {
    pub signal: MomentumSignal,
    /// Rate of change across the window, in percent
    pub roc: Decimal,
    /// Fraction of up-steps between adjacent points
    pub score: Decimal,
    pub recent_roc: Option<Decimal>,
    pub prior_roc: Option<Decimal>,
}

impl MomentumReading {
    fn neutral() -> Self {
        Self {
            signal: MomentumSignal::Neutral,
            roc: Decimal::ZERO,
            score: Decimal::ZERO,
            recent_roc: None,
            prior_roc: None,
        }
    }
}

/// Classify the last `period` points of `prices`.
pub fn classify(prices: &[Decimal], period: usize) -> MomentumSignal {
    analyze(prices, period).signal
}

/// Classify and return the intermediate values.
pub fn analyze(prices: &[Decimal], period: usize) -> MomentumReading {
    if period < 2 || prices.len() < period {
        return MomentumReading::neutral();
    }

    let window = &prices[prices.len() - period..];
    let first = window[0];
    let last = window[window.len() - 1];

    let roc = rate_of_change_pct(first, last);
    let up_moves = window.windows(2).filter(|w| w[1] > w[0]).count();
    let score = safe_div(Decimal::from(up_moves), Decimal::from(window.len() - 1));

    let mut reading = MomentumReading {
        signal: MomentumSignal::Neutral,
        roc,
        score,
        recent_roc: None,
        prior_roc: None,
    };

    if window.len() >= REVERSAL_MIN_POINTS {
        let n = window.len();
        let recent = &window[n - SUB_WINDOW..];
        let prior = &window[n - 2 * SUB_WINDOW..n - SUB_WINDOW];
        let recent_roc = rate_of_change_pct(recent[0], recent[SUB_WINDOW - 1]);
        let prior_roc = rate_of_change_pct(prior[0], prior[SUB_WINDOW - 1]);
        reading.recent_roc = Some(recent_roc);
        reading.prior_roc = Some(prior_roc);

        if prior_roc < -REVERSAL_PRIOR_ROC && recent_roc > REVERSAL_RECENT_ROC {
            reading.signal = MomentumSignal::ReversalUp;
            return reading;
        }
        if prior_roc > REVERSAL_PRIOR_ROC && recent_roc < -REVERSAL_RECENT_ROC {
            reading.signal = MomentumSignal::ReversalDown;
            return reading;
        }
    }

    reading.signal = if roc > TREND_ROC && score > BULLISH_SCORE {
        MomentumSignal::Bullish
    } else if roc < -TREND_ROC && score < BEARISH_SCORE {
        MomentumSignal::Bearish
    } else {
        MomentumSignal::Neutral
    };

    reading
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: Decimal, step: Decimal, n: usize) -> Vec<Decimal> {
        (0..n).map(|i| start + step * Decimal::from(i)).collect()
    }

    #[test]
    fn test_short_window_is_neutral() {
        for len in 0..DEFAULT_PERIOD {
            let prices = ramp(dec!(100), dec!(1), len);
            assert_eq!(classify(&prices, DEFAULT_PERIOD), MomentumSignal::Neutral);
        }
    }

    #[test]
    fn test_increasing_window_is_bullish() {
        let prices = ramp(dec!(100), dec!(0.1), 20);
        let reading = analyze(&prices, DEFAULT_PERIOD);
        assert_eq!(reading.signal, MomentumSignal::Bullish);
        assert_eq!(reading.roc, dec!(1.9));
        assert_eq!(reading.score, Decimal::ONE);
    }

    #[test]
    fn test_decreasing_window_is_bearish() {
        let prices = ramp(dec!(100), dec!(-0.1), 20);
        assert_eq!(classify(&prices, DEFAULT_PERIOD), MomentumSignal::Bearish);
    }

    #[test]
    fn test_flat_window_is_neutral() {
        let prices = vec![dec!(100); 20];
        assert_eq!(classify(&prices, DEFAULT_PERIOD), MomentumSignal::Neutral);
    }

    #[test]
    fn test_reversal_up() {
        let mut prices = vec![dec!(100); 10];
        // prior five: -0.15%
        prices.extend([dec!(100), dec!(99.95), dec!(99.90), dec!(99.875), dec!(99.85)]);
        // recent five: +0.25%
        prices.extend([dec!(100), dec!(100.1), dec!(100.15), dec!(100.2), dec!(100.25)]);

        let reading = analyze(&prices, DEFAULT_PERIOD);
        assert_eq!(reading.prior_roc, Some(dec!(-0.15)));
        assert_eq!(reading.recent_roc, Some(dec!(0.25)));
        assert_eq!(reading.signal, MomentumSignal::ReversalUp);
    }

    #[test]
    fn test_reversal_down_takes_precedence_over_trend() {
        // Strong overall rise, then a sharp drop in the last five points
        let mut prices = ramp(dec!(100), dec!(0.2), 15);
        prices.extend([dec!(103), dec!(102.9), dec!(102.8), dec!(102.7), dec!(102.6)]);

        let reading = analyze(&prices, DEFAULT_PERIOD);
        assert!(reading.roc > TREND_ROC);
        assert_eq!(reading.signal, MomentumSignal::ReversalDown);
    }

    #[test]
    fn test_uses_only_last_period_points() {
        // Old downtrend followed by a clean 20-point uptrend
        let mut prices = ramp(dec!(120), dec!(-1), 20);
        prices.extend(ramp(dec!(100), dec!(0.1), 20));
        assert_eq!(classify(&prices, DEFAULT_PERIOD), MomentumSignal::Bullish);
    }
}
