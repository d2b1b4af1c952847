//! Price feed aggregation for one underlying.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::gateway::TickKind;
use crate::utils::decimal::mid_price;

/// Capacity of the rolling price history.
pub const HISTORY_CAPACITY: usize = 100;

/// Below this many points the feed synthesizes bid/ask midpoints.
const SYNTHETIC_MIN_POINTS: usize = 5;

/// Where a history point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Last,
    BidAskMid,
    Close,
}

/// A single recorded price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub source: PriceSource,
}

/// Point-in-time copy of a feed, safe to compute on without holding the lock.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub current: Option<Decimal>,
    pub history: Vec<PriceTick>,
}

impl FeedSnapshot {
    /// History prices in arrival order.
    pub fn prices(&self) -> Vec<Decimal> {
        self.history.iter().map(|t| t.price).collect()
    }
}

/// Maintains the current price estimate and a bounded FIFO history.
///
/// Current price priority is last > bid/ask mid > close; lower priority
/// sources only fill an unset current price. Every ingest is O(1).
#[derive(Debug, Default)]
pub struct PriceFeed {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    current: Option<Decimal>,
    history: VecDeque<PriceTick>,
}

impl PriceFeed {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            ..Default::default()
        }
    }

    /// Apply one pushed tick.
    pub fn ingest(&mut self, kind: TickKind, price: Decimal, at: DateTime<Utc>) {
        if price <= Decimal::ZERO {
            return;
        }

        match kind {
            TickKind::Bid => {
                self.bid = Some(price);
                self.current.get_or_insert(price);
            }
            TickKind::Ask => {
                self.ask = Some(price);
                self.current.get_or_insert(price);
            }
            TickKind::Last => {
                self.current = Some(price);
                self.push(PriceTick {
                    timestamp: at,
                    price,
                    source: PriceSource::Last,
                });
            }
            TickKind::Close => {
                self.current.get_or_insert(price);
            }
        }

        // Thin or off-hours markets may never print a last trade
        if self.history.len() < SYNTHETIC_MIN_POINTS {
            if let (Some(bid), Some(ask)) = (self.bid, self.ask) {
                let stale = self
                    .history
                    .back()
                    .map_or(true, |t| at - t.timestamp > Duration::seconds(1));
                if stale {
                    let mid = mid_price(bid, ask);
                    self.push(PriceTick {
                        timestamp: at,
                        price: mid,
                        source: PriceSource::BidAskMid,
                    });
                    self.current.get_or_insert(mid);
                }
            }
        }
    }

    fn push(&mut self, tick: PriceTick) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(tick);
    }

    pub fn current(&self) -> Option<Decimal> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            current: self.current,
            history: self.history.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-11-03T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_last_overrides_lower_priority() {
        let mut feed = PriceFeed::new();
        feed.ingest(TickKind::Close, dec!(4990), t0());
        assert_eq!(feed.current(), Some(dec!(4990)));

        feed.ingest(TickKind::Bid, dec!(4995), t0());
        assert_eq!(feed.current(), Some(dec!(4990)));

        feed.ingest(TickKind::Last, dec!(5001), t0());
        assert_eq!(feed.current(), Some(dec!(5001)));

        // Close never overwrites once set
        feed.ingest(TickKind::Close, dec!(4980), t0());
        assert_eq!(feed.current(), Some(dec!(5001)));
    }

    #[test]
    fn test_ignores_non_positive_prices() {
        let mut feed = PriceFeed::new();
        feed.ingest(TickKind::Last, dec!(0), t0());
        feed.ingest(TickKind::Last, dec!(-1), t0());
        assert_eq!(feed.current(), None);
        assert!(feed.is_empty());
    }

    #[test]
    fn test_synthesizes_mid_when_history_thin() {
        let mut feed = PriceFeed::new();
        feed.ingest(TickKind::Bid, dec!(5000.00), t0());
        feed.ingest(TickKind::Ask, dec!(5000.50), t0());

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].price, dec!(5000.25));
        assert_eq!(snapshot.history[0].source, PriceSource::BidAskMid);

        // Within one second: no duplicate synthetic point
        feed.ingest(TickKind::Bid, dec!(5000.25), t0() + Duration::milliseconds(500));
        assert_eq!(feed.len(), 1);

        feed.ingest(TickKind::Bid, dec!(5000.25), t0() + Duration::seconds(2));
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_no_synthesis_once_history_is_established() {
        let mut feed = PriceFeed::new();
        for i in 0..5 {
            feed.ingest(TickKind::Last, dec!(5000) + Decimal::from(i), t0());
        }
        feed.ingest(TickKind::Bid, dec!(4999), t0() + Duration::seconds(10));
        feed.ingest(TickKind::Ask, dec!(5001), t0() + Duration::seconds(10));
        assert_eq!(feed.len(), 5);
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut feed = PriceFeed::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            feed.ingest(TickKind::Last, dec!(1) + Decimal::from(i), t0());
        }

        let prices = feed.snapshot().prices();
        assert_eq!(prices.len(), HISTORY_CAPACITY);
        assert_eq!(prices[0], dec!(11));
        assert_eq!(*prices.last().unwrap(), dec!(110));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut feed = PriceFeed::new();
        feed.ingest(TickKind::Last, dec!(5000), t0());
        let snapshot = feed.snapshot();

        feed.ingest(TickKind::Last, dec!(5005), t0());
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.current, Some(dec!(5000)));
    }
}
