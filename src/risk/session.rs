//! Session performance counters.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

use crate::strategy::ClosedTrade;
use crate::utils::decimal::safe_div;

/// Counters for the current trading day plus cumulative PnL.
///
/// Mutated only when a closing order fills.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub trades_today: u32,
    pub wins: u32,
    pub losses: u32,
    /// Cumulative for the process
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub session_date: NaiveDate,
}

impl SessionStats {
    pub fn new(session_date: NaiveDate) -> Self {
        Self {
            trades_today: 0,
            wins: 0,
            losses: 0,
            total_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            last_trade_time: None,
            session_date,
        }
    }

    /// Record a realized round trip. A zero PnL counts as a loss.
    pub fn record_trade(&mut self, trade: &ClosedTrade, at: DateTime<Utc>) {
        let pnl = trade.pnl;
        self.trades_today += 1;
        self.total_pnl += pnl;
        self.daily_pnl += pnl;
        self.last_trade_time = Some(at);

        if trade.is_win() {
            self.wins += 1;
            info!(%pnl, daily_pnl = %self.daily_pnl, "[WIN] Trade closed");
        } else {
            self.losses += 1;
            info!(%pnl, daily_pnl = %self.daily_pnl, "[LOSS] Trade closed");
        }
    }

    /// Reset daily counters when the date changes. Returns true on rollover.
    pub fn roll_session(&mut self, date: NaiveDate) -> bool {
        if date == self.session_date {
            return false;
        }

        info!(
            previous = %self.session_date,
            current = %date,
            trades = self.trades_today,
            daily_pnl = %self.daily_pnl,
            total_pnl = %self.total_pnl,
            "Session rolled over, daily counters reset"
        );
        self.trades_today = 0;
        self.wins = 0;
        self.losses = 0;
        self.daily_pnl = Decimal::ZERO;
        self.session_date = date;
        true
    }

    /// Win rate in percent.
    pub fn win_rate(&self) -> Decimal {
        safe_div(Decimal::from(self.wins), Decimal::from(self.trades_today)) * dec!(100)
    }

    pub fn log_summary(&self) {
        info!(
            trades = self.trades_today,
            wins = self.wins,
            losses = self.losses,
            win_rate = %self.win_rate().round_dp(1),
            daily_pnl = %self.daily_pnl,
            total_pnl = %self.total_pnl,
            "[STATS] Session performance"
        );
    }
}
