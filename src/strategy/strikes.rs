//! Option strike selection.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{ScalperError, ScalperResult};
use crate::gateway::Direction;
use crate::utils::decimal::round_to_tick;

/// Pick a slightly in-the-money strike for `direction`.
///
/// With a chain snapshot: Call takes the highest listed strike at or below
/// `price`, Put the lowest at or above, both falling back to the listed
/// strike nearest the price. Without a chain: round to the quoting
/// interval and step one interval in-the-money.
pub fn select_strike(
    symbol: &str,
    chain: Option<&[Decimal]>,
    price: Decimal,
    direction: Direction,
    interval: Decimal,
) -> ScalperResult<Decimal> {
    let Some(strikes) = chain else {
        let atm = round_to_tick(price, interval);
        let strike = match direction {
            Direction::Call => atm - interval,
            Direction::Put => atm + interval,
        };
        warn!(%symbol, %price, %atm, %strike, %direction, "No option chain, using heuristic strike");
        return Ok(strike);
    };

    let Some(atm) = strikes
        .iter()
        .copied()
        .min_by_key(|s| (*s - price).abs())
    else {
        return Err(ScalperError::StrikeUnavailable {
            symbol: symbol.to_string(),
            direction,
            price,
        });
    };

    let itm = match direction {
        Direction::Call => strikes.iter().copied().filter(|s| *s <= price).max(),
        Direction::Put => strikes.iter().copied().filter(|s| *s >= price).min(),
    };
    let strike = itm.unwrap_or(atm);

    debug!(
        %symbol,
        %price,
        %atm,
        %strike,
        %direction,
        available = strikes.len(),
        "Strike selected from chain"
    );
    Ok(strike)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn chain() -> Vec<Decimal> {
        vec![dec!(4990), dec!(4995), dec!(5000), dec!(5005), dec!(5010)]
    }

    #[test]
    fn test_heuristic_steps_one_interval_itm() {
        let call = select_strike("MES", None, dec!(5012.4), Direction::Call, dec!(5)).unwrap();
        let put = select_strike("MES", None, dec!(5012.4), Direction::Put, dec!(5)).unwrap();
        assert_eq!(call, dec!(5005));
        assert_eq!(put, dec!(5015));

        let mnq = select_strike("MNQ", None, dec!(17524.9), Direction::Call, dec!(50)).unwrap();
        assert_eq!(mnq, dec!(17450));
    }

    #[test]
    fn test_chain_call_takes_highest_below_price() {
        let strikes = chain();
        let strike =
            select_strike("MES", Some(strikes.as_slice()), dec!(5003), Direction::Call, dec!(5)).unwrap();
        assert_eq!(strike, dec!(5000));
    }

    #[test]
    fn test_chain_put_takes_lowest_above_price() {
        let strikes = chain();
        let strike =
            select_strike("MES", Some(strikes.as_slice()), dec!(5003), Direction::Put, dec!(5)).unwrap();
        assert_eq!(strike, dec!(5005));
    }

    #[test]
    fn test_chain_falls_back_to_atm() {
        let strikes = chain();
        // Price below every listed strike: no Call candidate
        let call =
            select_strike("MES", Some(strikes.as_slice()), dec!(4980), Direction::Call, dec!(5)).unwrap();
        assert_eq!(call, dec!(4990));

        // Price above every listed strike: no Put candidate
        let put =
            select_strike("MES", Some(strikes.as_slice()), dec!(5030), Direction::Put, dec!(5)).unwrap();
        assert_eq!(put, dec!(5010));
    }

    #[test]
    fn test_empty_chain_is_strike_unavailable() {
        let result = select_strike("MES", Some(&[][..]), dec!(5000), Direction::Call, dec!(5));
        assert!(matches!(
            result,
            Err(ScalperError::StrikeUnavailable {
                direction: Direction::Call,
                ..
            })
        ));
    }
}
