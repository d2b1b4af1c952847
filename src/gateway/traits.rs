//! Broker gateway capabilities.
//!
//! Outbound requests and inbound asynchronous events are separate traits:
//! - `GatewayClient`: what the engine asks of the broker
//! - `GatewayEventSink`: what the broker pushes back (ticks, order status, chains)
//!
//! A broker adapter implements `GatewayClient` and is handed the sink it
//! delivers events into. Sink handlers run on the adapter's task and must
//! stay O(1); they never wait on the orchestrator.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{OrderIntent, OrderStatus, TickKind};

/// Outbound requests to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Open a session. Returns the next valid order id issued by the broker.
    async fn connect(&self, host: &str, port: u16, client_id: u32) -> anyhow::Result<u64>;

    /// Start streaming bid/ask/last/close ticks for an underlying.
    async fn subscribe(&self, symbol: &str) -> anyhow::Result<()>;

    /// Ask for the option chain of an underlying. The answer arrives via
    /// `GatewayEventSink::on_option_chain`, possibly never.
    async fn request_option_chain(&self, symbol: &str) -> anyhow::Result<()>;

    /// Fire-and-forget market order. Status arrives via `on_order_status`.
    async fn place_order(&self, order_id: u64, intent: &OrderIntent) -> anyhow::Result<()>;

    /// Best-effort cancel of a working order.
    async fn cancel_order(&self, order_id: u64) -> anyhow::Result<()>;

    async fn disconnect(&self);
}

/// Inbound events pushed by the broker.
#[async_trait]
pub trait GatewayEventSink: Send + Sync {
    async fn on_tick(&self, symbol: &str, kind: TickKind, price: Decimal);

    async fn on_order_status(
        &self,
        order_id: u64,
        status: OrderStatus,
        filled_qty: Decimal,
        avg_price: Decimal,
    );

    async fn on_option_chain(&self, symbol: &str, expirations: Vec<String>, strikes: Vec<Decimal>);

    async fn on_connection_lost(&self, reason: &str);

    /// Broker error or notice. `req_id` is -1 for session-level notices.
    async fn on_gateway_error(&self, req_id: i64, code: i32, message: &str);
}
