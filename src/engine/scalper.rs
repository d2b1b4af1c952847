//! Scalping loop orchestrator.
//!
//! Polls the shared session state at a fixed cadence. Each cycle:
//! 1. Stop on connection loss
//! 2. Roll daily counters at the UTC date boundary
//! 3. Expire unacknowledged orders, then hold new orders until the broker
//!    confirms the cancel or the grace period passes
//! 4. Manage the open position (trailing stop, exit rules), or
//! 5. When flat, gate and evaluate an entry on the round-robin candidate symbol

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::state::SessionState;
use crate::config::Config;
use crate::error::{ScalperError, ScalperResult};
use crate::gateway::{connect_with_fallback, Direction, GatewayClient, OrderAction, OrderIntent};
use crate::risk::{GateDecision, RiskGovernor};
use crate::strategy::{
    analyze, calculate_stops, select_strike, ExitReason, MomentumSignal, OrderRecord,
    PositionState,
};

/// Poll interval for bounded waits on external data.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Longest single sleep while backing off, so shutdown stays responsive.
const BACKOFF_SLICE: Duration = Duration::from_millis(250);

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing to do
    Idle,
    /// No price yet for the symbol under evaluation
    NoData,
    /// Entry gated; the loop backs off
    Suppressed(GateDecision),
    /// Waiting on an order acknowledgement
    Awaiting(PositionState),
    Entered { order_id: u64 },
    Exited { order_id: u64, reason: ExitReason },
}

pub struct ScalpingEngine {
    config: Config,
    gateway: Arc<dyn GatewayClient>,
    state: Arc<SessionState>,
    governor: RiskGovernor,
    shutdown: Arc<AtomicBool>,
    symbol_index: usize,
    cycles: u64,
}

impl ScalpingEngine {
    pub fn new(
        config: Config,
        gateway: Arc<dyn GatewayClient>,
        state: Arc<SessionState>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let governor = RiskGovernor::new(config.risk.clone());
        Self {
            config,
            gateway,
            state,
            governor,
            shutdown,
            symbol_index: 0,
            cycles: 0,
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Connect, subscribe and wait (bounded) for chains and a first price.
    pub async fn start(&self, client_id: u32) -> Result<()> {
        let settings = &self.config.gateway;
        let (port, next_order_id) = connect_with_fallback(
            self.gateway.as_ref(),
            &settings.host,
            &settings.ports,
            client_id,
        )
        .await
        .context("Failed to connect to gateway")?;
        self.state.seed_order_ids(next_order_id).await;
        info!(port, client_id, next_order_id, "✅ [INIT] Gateway session ready");

        for symbol in &self.config.scalper.symbols {
            self.gateway
                .subscribe(symbol)
                .await
                .with_context(|| format!("Failed to subscribe to {}", symbol))?;

            if let Err(e) = self.gateway.request_option_chain(symbol).await {
                warn!(%symbol, error = %e, "Option chain request failed");
            }
        }

        let chain_wait = Duration::from_secs(self.config.execution.chain_timeout_secs);
        let chains_ready = tokio::time::timeout(chain_wait, async {
            loop {
                let mut all = true;
                for symbol in &self.config.scalper.symbols {
                    all &= self.state.has_chain(symbol).await;
                }
                if all {
                    break;
                }
                tokio::time::sleep(WAIT_POLL).await;
            }
        })
        .await;

        if chains_ready.is_err() {
            for symbol in &self.config.scalper.symbols {
                if !self.state.has_chain(symbol).await {
                    let err = ScalperError::ChainUnavailable {
                        symbol: symbol.clone(),
                    };
                    warn!(error = %err, timeout_secs = chain_wait.as_secs(), "Using heuristic strikes");
                }
            }
        }

        let price_wait = Duration::from_secs(self.config.execution.first_price_timeout_secs);
        let priced = tokio::time::timeout(price_wait, async {
            while !self.state.has_any_price().await {
                tokio::time::sleep(WAIT_POLL).await;
            }
        })
        .await;

        match priced {
            Ok(()) => {
                for symbol in &self.config.scalper.symbols {
                    if let Some(price) = self.state.current_price(symbol).await {
                        info!(%symbol, %price, "[OK] First price received");
                    }
                }
            }
            Err(_) => warn!(
                timeout_secs = price_wait.as_secs(),
                "No price data yet, continuing anyway"
            ),
        }

        Ok(())
    }

    /// Run cycles until shutdown is requested or the connection is lost.
    pub async fn run(&mut self) -> Result<()> {
        let interval = Duration::from_millis(self.config.scalper.cycle_interval_ms);

        info!(
            symbols = ?self.config.scalper.symbols,
            expiry = %self.config.scalper.options_expiry,
            "🚀 Options scalper active"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.run_cycle(Utc::now()).await {
                Ok(CycleOutcome::Suppressed(decision)) => {
                    self.pause(self.governor.backoff(decision)).await;
                }
                Ok(_) => self.pause(interval).await,
                Err(ScalperError::ConnectionLost(reason)) => {
                    error!(%reason, "Connection lost, halting entries");
                    self.flatten().await;
                    self.gateway.disconnect().await;
                    return Err(ScalperError::ConnectionLost(reason).into());
                }
                Err(e) => {
                    error!(error = %e, "Error in scalping cycle");
                    self.pause(interval).await;
                }
            }
        }

        info!("Shutdown requested, stopping scalper");
        self.flatten().await;
        self.state.stats().await.log_summary();
        self.gateway.disconnect().await;
        Ok(())
    }

    /// One orchestration cycle at `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> ScalperResult<CycleOutcome> {
        self.cycles += 1;

        if self.state.is_connection_lost() {
            return Err(ScalperError::ConnectionLost(self.state.lost_reason().await));
        }

        self.state.roll_session(now).await;
        self.expire_orders(now).await;

        // Rotation only picks the entry candidate
        let candidate = self.next_candidate();

        let outcome = match self.state.position_state().await {
            settled @ (PositionState::Flat | PositionState::InPosition)
                if self.state.awaiting_cancel(now, self.cancel_grace()).await =>
            {
                debug!(state = ?settled, "Holding orders until timed out cancel is confirmed");
                CycleOutcome::Awaiting(settled)
            }
            PositionState::InPosition => self.manage_position(now).await,
            PositionState::Flat => self.seek_entry(&candidate, now).await,
            pending => {
                debug!(state = ?pending, "Awaiting order acknowledgement");
                CycleOutcome::Awaiting(pending)
            }
        };

        let every = self.config.scalper.stats_every_cycles;
        if every > 0 && self.cycles % every == 0 {
            self.state.stats().await.log_summary();
        }

        Ok(outcome)
    }

    fn next_candidate(&mut self) -> String {
        let symbols = &self.config.scalper.symbols;
        let symbol = symbols[self.symbol_index % symbols.len()].clone();
        self.symbol_index = self.symbol_index.wrapping_add(1);
        symbol
    }

    fn cancel_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.execution.cancel_grace_secs as i64)
    }

    async fn expire_orders(&self, now: DateTime<Utc>) {
        let timeout = chrono::Duration::seconds(self.config.execution.order_ack_timeout_secs as i64);
        for order_id in self.state.expire_orders(now, timeout).await {
            if let Err(e) = self.gateway.cancel_order(order_id).await {
                warn!(order_id, error = %e, "Cancel for timed out order failed");
            }
        }
    }

    async fn manage_position(&self, now: DateTime<Utc>) -> CycleOutcome {
        let Some(position) = self.state.position().await else {
            return CycleOutcome::Idle;
        };
        let Some(snapshot) = self.state.feed_snapshot(&position.symbol).await else {
            return CycleOutcome::NoData;
        };
        let Some(price) = snapshot.current else {
            let err = ScalperError::DataUnavailable {
                symbol: position.symbol.clone(),
            };
            debug!(error = %err, "Skipping exit evaluation");
            return CycleOutcome::NoData;
        };

        let reading = analyze(&snapshot.prices(), self.config.scalper.momentum_period);
        let Some(reason) = self.state.mark_and_evaluate(price, reading.signal).await else {
            return CycleOutcome::Idle;
        };

        match self.submit_exit(reason, now).await {
            Some(order_id) => CycleOutcome::Exited { order_id, reason },
            None => CycleOutcome::Idle,
        }
    }

    async fn seek_entry(&self, symbol: &str, now: DateTime<Utc>) -> CycleOutcome {
        let Some(snapshot) = self.state.feed_snapshot(symbol).await else {
            return CycleOutcome::NoData;
        };
        let Some(price) = snapshot.current else {
            let err = ScalperError::DataUnavailable {
                symbol: symbol.to_string(),
            };
            debug!(error = %err, "Skipping entry evaluation");
            return CycleOutcome::NoData;
        };

        let stats = self.state.stats().await;
        let decision = self.governor.evaluate(&stats, now);
        if !decision.is_open() {
            return CycleOutcome::Suppressed(decision);
        }

        let reading = analyze(&snapshot.prices(), self.config.scalper.momentum_period);
        let direction = match reading.signal {
            MomentumSignal::Bullish | MomentumSignal::ReversalUp => Direction::Call,
            MomentumSignal::Bearish | MomentumSignal::ReversalDown => Direction::Put,
            MomentumSignal::Neutral => {
                debug!(
                    %symbol,
                    %price,
                    history = snapshot.history.len(),
                    roc = %reading.roc,
                    score = %reading.score,
                    "No entry signal"
                );
                return CycleOutcome::Idle;
            }
        };

        info!(
            %symbol,
            %price,
            signal = %reading.signal,
            roc = %reading.roc,
            score = %reading.score,
            recent_roc = ?reading.recent_roc,
            prior_roc = ?reading.prior_roc,
            "[SIGNAL] Entry signal"
        );

        let expiry = &self.config.scalper.options_expiry;
        let chain = self.state.chain_strikes(symbol, expiry).await;
        let interval = self.config.scalper.strike_interval(symbol);
        let strike = match select_strike(symbol, chain.as_deref(), price, direction, interval) {
            Ok(strike) => strike,
            Err(e) => {
                error!(error = %e, "Entry skipped");
                return CycleOutcome::Idle;
            }
        };

        let intent = OrderIntent {
            action: OrderAction::Buy,
            symbol: symbol.to_string(),
            expiry: expiry.clone(),
            strike,
            direction,
            quantity: self.config.scalper.quantity,
        };

        let record = match self.state.open_entry(intent, now).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Entry refused");
                return CycleOutcome::Idle;
            }
        };

        let projected = calculate_stops(
            price,
            self.config.stops.stop_loss_multiplier,
            self.config.stops.profit_target_multiplier,
        );
        info!(
            order_id = record.order_id,
            %symbol,
            %direction,
            %strike,
            %price,
            stop = %projected.stop_loss,
            target = %projected.profit_target,
            "[BUY] Entry order placed"
        );

        if self.place(&record, now).await {
            CycleOutcome::Entered {
                order_id: record.order_id,
            }
        } else {
            CycleOutcome::Idle
        }
    }

    async fn submit_exit(&self, reason: ExitReason, now: DateTime<Utc>) -> Option<u64> {
        let record = self.state.open_exit(reason, now).await?;
        info!(
            order_id = record.order_id,
            intent = %record.intent.describe(),
            %reason,
            "[SELL] Exit order placed"
        );

        self.place(&record, now).await.then_some(record.order_id)
    }

    /// Hand a recorded order to the gateway, resolving it locally on failure.
    async fn place(&self, record: &OrderRecord, now: DateTime<Utc>) -> bool {
        match self.gateway.place_order(record.order_id, &record.intent).await {
            Ok(()) => true,
            Err(e) => {
                error!(order_id = record.order_id, error = %e, "Gateway refused order");
                self.state.fail_order(record.order_id, now).await;
                false
            }
        }
    }

    /// Best-effort close of any open position within the shutdown timeout.
    pub async fn flatten(&self) {
        let limit = Duration::from_secs(self.config.execution.shutdown_close_timeout_secs);

        let closed = tokio::time::timeout(limit, async {
            let mut attempted = false;
            loop {
                let now = Utc::now();
                match self.state.position_state().await {
                    PositionState::Flat => return true,
                    PositionState::InPosition if attempted => return false,
                    PositionState::InPosition
                        if self.state.awaiting_cancel(now, self.cancel_grace()).await => {}
                    PositionState::InPosition => {
                        attempted = true;
                        if self.submit_exit(ExitReason::Flatten, now).await.is_none() {
                            return false;
                        }
                    }
                    PositionState::Entering | PositionState::Exiting => {}
                }
                tokio::time::sleep(WAIT_POLL).await;
            }
        })
        .await;

        match closed {
            Ok(true) => info!("Position flat at shutdown"),
            Ok(false) => warn!("Closing order failed, position left open"),
            Err(_) => {
                let state = self.state.position_state().await;
                warn!(
                    timeout_secs = limit.as_secs(),
                    ?state,
                    "Position not confirmed flat before timeout"
                );
            }
        }
    }

    /// Sleep in slices, returning early on shutdown.
    async fn pause(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.shutdown.load(Ordering::SeqCst) {
            let slice = remaining.min(BACKOFF_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}
