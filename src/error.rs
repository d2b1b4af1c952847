//! Error taxonomy for the scalping engine.
//!
//! Data and chain issues recover locally through fallbacks, order-level
//! failures always resolve the position to an unambiguous state, and only
//! `ConnectionLost` propagates to the top of the run loop.

use rust_decimal::Decimal;

use crate::gateway::{Direction, OrderStatus};
use crate::strategy::PositionState;

#[derive(Debug, thiserror::Error)]
pub enum ScalperError {
    /// No price has been received for the symbol yet. Retry next cycle.
    #[error("no price data available for {symbol}")]
    DataUnavailable { symbol: String },

    /// Option chain did not arrive in time. Callers fall back to the heuristic strike.
    #[error("option chain unavailable for {symbol}")]
    ChainUnavailable { symbol: String },

    /// Chain exists but offers no candidate strikes. Entry is skipped this cycle.
    #[error("no {direction} strike available for {symbol} near {price}")]
    StrikeUnavailable {
        symbol: String,
        direction: Direction,
        price: Decimal,
    },

    /// Broker refused or cancelled the order.
    #[error("order {order_id} ended as {status:?}")]
    OrderRejected { order_id: u64, status: OrderStatus },

    /// Session-fatal loss of the broker connection.
    #[error("connection to gateway lost: {0}")]
    ConnectionLost(String),

    /// Event for an order or request this session never issued.
    #[error("unexpected gateway event for id {order_id}")]
    UnexpectedGatewayEvent { order_id: u64 },

    /// A new entry was requested while a position is still live.
    #[error("position already {state:?}, cannot open another")]
    PositionBusy { state: PositionState },

    /// Identifier allocation could not take the shared lock.
    #[error("client id allocator lock failed: {0}")]
    AllocatorLock(String),
}

pub type ScalperResult<T> = Result<T, ScalperError>;
