//! Order lifecycle tracking.
//!
//! Correlates locally allocated order ids with asynchronous broker status
//! updates. Status moves monotonically from `Submitted` to exactly one
//! terminal state; anything arriving afterwards is logged and dropped.
//!
//! The one exception is an order cancelled locally after its acknowledgement
//! timed out. Until the broker confirms the cancel, a fill for it is still
//! reported (as [`OrderEvent::LateFill`]) so the position can account for it.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::error::ScalperError;
use crate::gateway::{OrderAction, OrderIntent, OrderStatus};

/// A submitted order and what the broker has said about it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order_id: u64,
    pub intent: OrderIntent,
    pub status: OrderStatus,
    pub filled_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
    /// Set when the order was cancelled locally and the broker has not yet
    /// confirmed the cancel
    pub expired_at: Option<DateTime<Utc>>,
}

/// Terminal outcome handed to the position machine.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// Buy filled
    PositionFilled { order_id: u64, fill_price: Decimal },
    /// Sell filled
    PositionClosed { order_id: u64, fill_price: Decimal },
    /// Rejected, cancelled or timed out
    OrderFailed { order_id: u64, status: OrderStatus },
    /// Filled after it was already expired locally
    LateFill {
        order_id: u64,
        intent: OrderIntent,
        fill_price: Decimal,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> u64 {
        match self {
            OrderEvent::PositionFilled { order_id, .. }
            | OrderEvent::PositionClosed { order_id, .. }
            | OrderEvent::OrderFailed { order_id, .. }
            | OrderEvent::LateFill { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct OrderBook {
    records: HashMap<u64, OrderRecord>,
    next_id: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Align local id allocation with the broker's next valid id.
    pub fn seed(&mut self, next_valid_id: u64) {
        if next_valid_id > self.next_id {
            self.next_id = next_valid_id;
        }
        debug!(next_id = self.next_id, "Order id sequence seeded");
    }

    /// Record a new order before it is handed to the gateway.
    pub fn submit(&mut self, intent: OrderIntent, now: DateTime<Utc>) -> OrderRecord {
        let order_id = self.next_id;
        self.next_id += 1;

        let record = OrderRecord {
            order_id,
            intent,
            status: OrderStatus::Submitted,
            filled_price: None,
            submitted_at: now,
            expired_at: None,
        };
        info!(order_id, intent = %record.intent.describe(), "Order submitted");

        self.records.insert(order_id, record.clone());
        record
    }

    pub fn get(&self, order_id: u64) -> Option<&OrderRecord> {
        self.records.get(&order_id)
    }

    /// Orders still waiting on a terminal status.
    pub fn working(&self) -> usize {
        self.records
            .values()
            .filter(|r| !r.status.is_terminal())
            .count()
    }

    /// Apply a broker status update.
    pub fn on_status(
        &mut self,
        order_id: u64,
        status: OrderStatus,
        filled_qty: Decimal,
        avg_price: Decimal,
    ) -> Option<OrderEvent> {
        let Some(record) = self.records.get_mut(&order_id) else {
            let err = ScalperError::UnexpectedGatewayEvent { order_id };
            debug!(error = %err, ?status, "Ignoring status for unknown order");
            return None;
        };

        if let Some(expired_at) = record.expired_at {
            match status {
                OrderStatus::Submitted => {
                    debug!(order_id, "Acknowledgement for an order expired locally");
                }
                OrderStatus::Filled => {
                    record.expired_at = None;
                    record.status = OrderStatus::Filled;
                    record.filled_price = Some(avg_price);
                    warn!(
                        order_id,
                        %expired_at,
                        %filled_qty,
                        %avg_price,
                        intent = %record.intent.describe(),
                        "Fill arrived for an order expired locally"
                    );
                    return Some(OrderEvent::LateFill {
                        order_id,
                        intent: record.intent.clone(),
                        fill_price: avg_price,
                    });
                }
                OrderStatus::Cancelled | OrderStatus::Rejected => {
                    record.expired_at = None;
                    info!(order_id, ?status, "Broker confirmed cancel of expired order");
                }
            }
            return None;
        }

        if record.status.is_terminal() {
            if status == OrderStatus::Filled && record.status != OrderStatus::Filled {
                error!(
                    order_id,
                    local_status = ?record.status,
                    %filled_qty,
                    %avg_price,
                    intent = %record.intent.describe(),
                    "Orphaned fill for an order already resolved locally"
                );
            } else {
                debug!(order_id, ?status, local_status = ?record.status, "Duplicate terminal status");
            }
            return None;
        }

        match status {
            OrderStatus::Submitted => {
                debug!(order_id, "Order acknowledged");
                None
            }
            OrderStatus::Filled => {
                record.status = OrderStatus::Filled;
                record.filled_price = Some(avg_price);
                info!(
                    order_id,
                    action = ?record.intent.action,
                    %filled_qty,
                    %avg_price,
                    "Order filled"
                );

                Some(match record.intent.action {
                    OrderAction::Buy => OrderEvent::PositionFilled {
                        order_id,
                        fill_price: avg_price,
                    },
                    OrderAction::Sell => OrderEvent::PositionClosed {
                        order_id,
                        fill_price: avg_price,
                    },
                })
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                record.status = status;
                let err = ScalperError::OrderRejected { order_id, status };
                warn!(error = %err, intent = %record.intent.describe(), "Order did not fill");
                Some(OrderEvent::OrderFailed { order_id, status })
            }
        }
    }

    /// Resolve an order the gateway refused to accept at submission.
    pub fn reject_local(&mut self, order_id: u64) -> Option<OrderEvent> {
        self.on_status(
            order_id,
            OrderStatus::Rejected,
            Decimal::ZERO,
            Decimal::ZERO,
        )
    }

    /// Cancel locally every `Submitted` order older than `timeout`.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<OrderEvent> {
        let mut expired = Vec::new();

        for record in self.records.values_mut() {
            if record.status.is_terminal() || now - record.submitted_at <= timeout {
                continue;
            }

            record.status = OrderStatus::Cancelled;
            record.expired_at = Some(now);
            warn!(
                order_id = record.order_id,
                age_secs = (now - record.submitted_at).num_seconds(),
                timeout_secs = timeout.num_seconds(),
                intent = %record.intent.describe(),
                "Order acknowledgement timed out, cancelled locally"
            );
            expired.push(OrderEvent::OrderFailed {
                order_id: record.order_id,
                status: OrderStatus::Cancelled,
            });
        }

        expired.sort_by_key(|e| e.order_id());
        expired
    }

    /// True while a local cancel is younger than `grace` and unconfirmed.
    pub fn awaiting_cancel(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.records
            .values()
            .filter_map(|r| r.expired_at)
            .any(|expired_at| now - expired_at < grace)
    }

    /// Drop terminal records submitted before `cutoff`. Returns how many went.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| !r.status.is_terminal() || r.submitted_at >= cutoff);
        let pruned = before - self.records.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.records.len(), "Pruned resolved orders");
        }
        pruned
    }
}
