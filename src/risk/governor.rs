//! Session risk gates for new entries.
//!
//! Three checks, evaluated in order:
//! - Trade count below the daily maximum
//! - Daily PnL above the loss limit
//! - Cooldown elapsed since the last closed trade
//!
//! Gates only suppress entries. Exit evaluation of an open position is
//! never gated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::SessionStats;
use crate::config::RiskConfig;

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateDecision {
    Open,
    TradeLimit,
    DailyLoss,
    Cooldown,
}

impl GateDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, GateDecision::Open)
    }
}

pub struct RiskGovernor {
    config: RiskConfig,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Loss limit in account currency.
    pub fn max_daily_loss(&self) -> Decimal {
        self.config.max_daily_loss_pct * self.config.account_balance
    }

    /// Evaluate all gates, logging the first that fails with its inputs.
    pub fn evaluate(&self, stats: &SessionStats, now: DateTime<Utc>) -> GateDecision {
        if stats.trades_today >= self.config.max_trades_per_day {
            info!(
                trades_today = stats.trades_today,
                max_trades = self.config.max_trades_per_day,
                "Entry suppressed: daily trade limit reached"
            );
            return GateDecision::TradeLimit;
        }

        let limit = -self.max_daily_loss();
        if stats.daily_pnl <= limit {
            warn!(
                daily_pnl = %stats.daily_pnl,
                %limit,
                "Entry suppressed: daily loss limit hit"
            );
            return GateDecision::DailyLoss;
        }

        if let Some(last) = stats.last_trade_time {
            let elapsed = (now - last).num_milliseconds();
            let cooldown_ms = (self.config.cooldown_seconds as i64).saturating_mul(1000);
            if elapsed < cooldown_ms {
                debug!(
                    elapsed_ms = elapsed,
                    cooldown_secs = self.config.cooldown_seconds,
                    "Entry suppressed: cooldown active"
                );
                return GateDecision::Cooldown;
            }
        }

        GateDecision::Open
    }

    /// How long the orchestrator backs off after a failed gate.
    pub fn backoff(&self, decision: GateDecision) -> Duration {
        let secs = match decision {
            GateDecision::Open => 0,
            GateDecision::TradeLimit => self.config.trade_limit_backoff_secs,
            GateDecision::DailyLoss => self.config.daily_loss_backoff_secs,
            GateDecision::Cooldown => self.config.cooldown_backoff_secs,
        };
        Duration::from_secs(secs)
    }
}
