//! Guarded shared state for one trading session.
//!
//! Written by the gateway's push context through [`GatewayEventSink`] and
//! read by the orchestrator's polling cycle. Each partition has its own lock:
//! - One `PriceFeed` mutex per configured symbol
//! - Option chains (read-mostly, `RwLock`)
//! - Order records
//! - The position machine
//! - Session stats
//!
//! Locks are acquired in the order orders, position, stats. The only nesting
//! is stats under the position guard when a trade closes, so a Flat position
//! is never observed before its trade is counted. Readers take snapshots and
//! compute unlocked.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ScalperResult;
use crate::gateway::{
    GatewayEventSink, OptionChain, OrderAction, OrderIntent, OrderStatus, TickKind,
    INFORMATIONAL_CODES,
};
use crate::risk::SessionStats;
use crate::strategy::{
    ClosedTrade, ExitReason, FeedSnapshot, MomentumSignal, OrderBook, OrderEvent, OrderRecord,
    Position, PositionMachine, PositionState, PriceFeed,
};

pub struct SessionState {
    feeds: HashMap<String, Mutex<PriceFeed>>,
    chains: RwLock<HashMap<String, OptionChain>>,
    orders: Mutex<OrderBook>,
    position: Mutex<PositionMachine>,
    stats: Mutex<SessionStats>,
    connection_lost: AtomicBool,
    lost_reason: Mutex<Option<String>>,
}

impl SessionState {
    pub fn new(config: &Config, session_date: NaiveDate) -> Self {
        let feeds = config
            .scalper
            .symbols
            .iter()
            .map(|s| (s.clone(), Mutex::new(PriceFeed::new())))
            .collect();

        Self {
            feeds,
            chains: RwLock::new(HashMap::new()),
            orders: Mutex::new(OrderBook::new()),
            position: Mutex::new(PositionMachine::new(
                config.stops.clone(),
                config.scalper.contract_multiplier,
                config.scalper.allow_reversals,
            )),
            stats: Mutex::new(SessionStats::new(session_date)),
            connection_lost: AtomicBool::new(false),
            lost_reason: Mutex::new(None),
        }
    }

    // ===== Price data =====

    /// Apply a tick with an explicit timestamp.
    pub async fn ingest_tick(&self, symbol: &str, kind: TickKind, price: Decimal, at: DateTime<Utc>) {
        match self.feeds.get(symbol) {
            Some(feed) => feed.lock().await.ingest(kind, price, at),
            None => debug!(%symbol, ?kind, %price, "Tick for unsubscribed symbol"),
        }
    }

    pub async fn feed_snapshot(&self, symbol: &str) -> Option<FeedSnapshot> {
        let feed = self.feeds.get(symbol)?;
        let snapshot = feed.lock().await.snapshot();
        Some(snapshot)
    }

    pub async fn current_price(&self, symbol: &str) -> Option<Decimal> {
        let feed = self.feeds.get(symbol)?;
        let current = feed.lock().await.current();
        current
    }

    /// True once any symbol has a price.
    pub async fn has_any_price(&self) -> bool {
        for feed in self.feeds.values() {
            if feed.lock().await.current().is_some() {
                return true;
            }
        }
        false
    }

    // ===== Option chains =====

    /// Listed strikes for `symbol` if its chain covers `expiry`.
    pub async fn chain_strikes(&self, symbol: &str, expiry: &str) -> Option<Vec<Decimal>> {
        let chains = self.chains.read().await;
        chains
            .get(symbol)
            .and_then(|c| c.strikes_for(expiry))
            .map(|s| s.to_vec())
    }

    pub async fn has_chain(&self, symbol: &str) -> bool {
        self.chains.read().await.contains_key(symbol)
    }

    // ===== Orders and position =====

    pub async fn seed_order_ids(&self, next_valid_id: u64) {
        self.orders.lock().await.seed(next_valid_id);
    }

    pub async fn order(&self, order_id: u64) -> Option<OrderRecord> {
        self.orders.lock().await.get(order_id).cloned()
    }

    pub async fn position_state(&self) -> PositionState {
        self.position.lock().await.state()
    }

    pub async fn position(&self) -> Option<Position> {
        self.position.lock().await.position().cloned()
    }

    /// Record a Buy and move the machine to Entering.
    pub async fn open_entry(&self, intent: OrderIntent, now: DateTime<Utc>) -> ScalperResult<OrderRecord> {
        let record = self.orders.lock().await.submit(intent, now);

        let begun = self
            .position
            .lock()
            .await
            .begin_entry(record.order_id, &record.intent);
        if let Err(e) = begun {
            self.orders.lock().await.reject_local(record.order_id);
            return Err(e);
        }
        Ok(record)
    }

    /// Record a Sell for the open position and move it to Exiting.
    pub async fn open_exit(&self, reason: ExitReason, now: DateTime<Utc>) -> Option<OrderRecord> {
        let intent = self.position.lock().await.position().and_then(|p| {
            (p.state == PositionState::InPosition).then(|| OrderIntent {
                action: OrderAction::Sell,
                symbol: p.symbol.clone(),
                expiry: p.expiry.clone(),
                strike: p.strike,
                direction: p.direction,
                quantity: p.quantity,
            })
        })?;

        let record = self.orders.lock().await.submit(intent, now);

        let begun = self.position.lock().await.begin_exit(record.order_id, reason);
        if !begun {
            self.orders.lock().await.reject_local(record.order_id);
            return None;
        }
        Some(record)
    }

    /// Mark the latest price and evaluate exits in one critical section.
    pub async fn mark_and_evaluate(
        &self,
        price: Decimal,
        signal: MomentumSignal,
    ) -> Option<ExitReason> {
        let mut position = self.position.lock().await;
        position.mark(price);
        position.evaluate_exit(price, signal)
    }

    /// Resolve an order the gateway refused at submission.
    pub async fn fail_order(&self, order_id: u64, now: DateTime<Utc>) {
        let event = self.orders.lock().await.reject_local(order_id);
        if let Some(event) = event {
            self.apply_event(event, now).await;
        }
    }

    /// Expire unacknowledged orders and resolve the position for each.
    pub async fn expire_orders(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<u64> {
        let expired = self.orders.lock().await.expire_stale(now, timeout);

        let mut ids = Vec::with_capacity(expired.len());
        for event in expired {
            ids.push(event.order_id());
            self.apply_event(event, now).await;
        }
        ids
    }

    async fn apply_event(&self, event: OrderEvent, at: DateTime<Utc>) -> Option<ClosedTrade> {
        let mut position = self.position.lock().await;
        let trade = position.apply(&event)?;
        self.stats.lock().await.record_trade(&trade, at);
        Some(trade)
    }

    /// True while a timed out order's cancel is unconfirmed and within `grace`.
    pub async fn awaiting_cancel(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.orders.lock().await.awaiting_cancel(now, grace)
    }

    // ===== Session =====

    pub async fn stats(&self) -> SessionStats {
        self.stats.lock().await.clone()
    }

    /// Reset daily counters on a new UTC date and forget orders resolved
    /// more than a day ago.
    pub async fn roll_session(&self, now: DateTime<Utc>) -> bool {
        let rolled = self.stats.lock().await.roll_session(now.date_naive());
        if rolled {
            self.orders.lock().await.prune(now - Duration::days(1));
        }
        rolled
    }

    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::SeqCst)
    }

    pub async fn lost_reason(&self) -> String {
        self.lost_reason
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(test)]
    pub(crate) async fn stats_mut(&self) -> tokio::sync::MutexGuard<'_, SessionStats> {
        self.stats.lock().await
    }
}

#[async_trait]
impl GatewayEventSink for SessionState {
    async fn on_tick(&self, symbol: &str, kind: TickKind, price: Decimal) {
        self.ingest_tick(symbol, kind, price, Utc::now()).await;
    }

    async fn on_order_status(
        &self,
        order_id: u64,
        status: OrderStatus,
        filled_qty: Decimal,
        avg_price: Decimal,
    ) {
        let event = self
            .orders
            .lock()
            .await
            .on_status(order_id, status, filled_qty, avg_price);

        if let Some(event) = event {
            if let Some(trade) = self.apply_event(event, Utc::now()).await {
                info!(
                    symbol = %trade.symbol,
                    direction = %trade.direction,
                    strike = %trade.strike,
                    entry = %trade.entry_price,
                    exit = %trade.exit_price,
                    pnl = %trade.pnl,
                    reason = ?trade.reason,
                    "Round trip complete"
                );
            }
        }
    }

    async fn on_option_chain(&self, symbol: &str, expirations: Vec<String>, strikes: Vec<Decimal>) {
        let chain = OptionChain::new(expirations, strikes);
        info!(
            %symbol,
            expirations = chain.expirations.len(),
            strikes = chain.strikes.len(),
            "[OK] Option chain loaded"
        );
        self.chains.write().await.insert(symbol.to_string(), chain);
    }

    async fn on_connection_lost(&self, reason: &str) {
        *self.lost_reason.lock().await = Some(reason.to_string());
        self.connection_lost.store(true, Ordering::SeqCst);
        error!(%reason, "Gateway connection lost");
    }

    async fn on_gateway_error(&self, req_id: i64, code: i32, message: &str) {
        if INFORMATIONAL_CODES.contains(&code) {
            debug!(req_id, code, %message, "Gateway notice");
        } else if req_id < 0 {
            warn!(code, %message, "Gateway session error");
        } else {
            error!(req_id, code, %message, "Gateway request error");
        }
    }
}
