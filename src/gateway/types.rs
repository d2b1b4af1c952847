//! Wire-level types exchanged with the broker gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Price field carried by a market data tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    Bid,
    Ask,
    Last,
    Close,
}

/// Option right being traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    /// Single-letter right code used in contract descriptions.
    pub fn right_code(&self) -> &'static str {
        match self {
            Direction::Call => "C",
            Direction::Put => "P",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Call => write!(f, "CALL"),
            Direction::Put => write!(f, "PUT"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

/// A request to open or close an option position at market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub action: OrderAction,
    /// Underlying futures symbol (e.g., "MES")
    pub symbol: String,
    /// Option expiry in the broker's contract-month format (e.g., "202512")
    pub expiry: String,
    pub strike: Decimal,
    pub direction: Direction,
    pub quantity: u32,
}

impl OrderIntent {
    /// Human readable contract description for logs.
    pub fn describe(&self) -> String {
        format!(
            "{:?} {} {} {}{} x{}",
            self.action,
            self.symbol,
            self.expiry,
            self.strike,
            self.direction.right_code(),
            self.quantity
        )
    }
}

/// Order status reported by the gateway.
///
/// `Submitted` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Submitted)
    }
}

/// Option chain snapshot for one underlying.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionChain {
    pub expirations: BTreeSet<String>,
    /// Sorted, deduplicated strikes
    pub strikes: Vec<Decimal>,
}

impl OptionChain {
    pub fn new(expirations: impl IntoIterator<Item = String>, strikes: Vec<Decimal>) -> Self {
        let mut strikes = strikes;
        strikes.sort();
        strikes.dedup();
        Self {
            expirations: expirations.into_iter().collect(),
            strikes,
        }
    }

    /// Strikes listed for an expiry, or `None` if the chain does not cover it.
    pub fn strikes_for(&self, expiry: &str) -> Option<&[Decimal]> {
        if self.expirations.contains(expiry) {
            Some(&self.strikes)
        } else {
            None
        }
    }
}

/// Broker notice codes that are informational (market data farm status etc).
pub const INFORMATIONAL_CODES: [i32; 5] = [2104, 2106, 2107, 2119, 2158];

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_submitted_is_working() {
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_chain_normalizes_strikes() {
        let chain = OptionChain::new(
            vec!["202512".to_string()],
            vec![dec!(5010), dec!(5000), dec!(5010), dec!(5005)],
        );
        assert_eq!(chain.strikes, vec![dec!(5000), dec!(5005), dec!(5010)]);
        assert!(chain.strikes_for("202512").is_some());
        assert!(chain.strikes_for("202603").is_none());
    }

    #[test]
    fn test_intent_description() {
        let intent = OrderIntent {
            action: OrderAction::Buy,
            symbol: "MES".to_string(),
            expiry: "202512".to_string(),
            strike: dec!(5000),
            direction: Direction::Put,
            quantity: 1,
        };
        assert_eq!(intent.describe(), "Buy MES 202512 5000P x1");
    }
}
