//! Scalping strategy implementation.
//!
//! Contains the core logic for:
//! - Price feed aggregation and history
//! - Momentum and reversal classification
//! - Strike selection from option chains
//! - Stop-loss / profit-target / trailing-stop levels
//! - Single-position lifecycle and exit rules
//! - Order lifecycle tracking

mod feed;
mod momentum;
mod orders;
mod position;
mod stops;
mod strikes;

pub use feed::{FeedSnapshot, PriceFeed, PriceSource, PriceTick, HISTORY_CAPACITY};
pub use momentum::{analyze, classify, MomentumReading, MomentumSignal, DEFAULT_PERIOD};
pub use orders::{OrderBook, OrderEvent, OrderRecord};
pub use position::{ClosedTrade, ExitReason, Position, PositionMachine, PositionState};
pub use stops::{calculate_stops, update_trailing_stop, StopLevels};
pub use strikes::select_strike;
