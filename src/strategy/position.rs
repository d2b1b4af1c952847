//! Single-position lifecycle.
//!
//! ```text
//! Flat --buy submitted--> Entering --buy filled--> InPosition
//!   ^                        |                       |    ^
//!   |       buy rejected/cancelled               exit rule |
//!   +------------------------+                       v    | sell rejected/cancelled
//!   +-----------------sell filled----------------- Exiting
//! ```
//!
//! At most one position exists per engine. Entries are refused unless the
//! machine is `Flat`, and order events only move the machine when they carry
//! the id of the order it is waiting on. Fills for orders that already timed
//! out are adopted only when the machine is in the state the timeout left it.

use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, error, info, warn};

use super::momentum::MomentumSignal;
use super::orders::OrderEvent;
use super::stops::{calculate_stops, update_trailing_stop};
use crate::config::StopConfig;
use crate::error::{ScalperError, ScalperResult};
use crate::gateway::{Direction, OrderAction, OrderIntent, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Entering,
    InPosition,
    Exiting,
}

/// Which exit rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Target,
    Stop,
    Reversal,
    /// Close requested by shutdown or connection loss
    Flatten,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::Target => "target",
            ExitReason::Stop => "stop",
            ExitReason::Reversal => "reversal",
            ExitReason::Flatten => "flatten",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub expiry: String,
    pub direction: Direction,
    pub strike: Decimal,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub profit_target: Decimal,
    pub trailing_activation: Decimal,
    pub highest: Decimal,
    pub lowest: Decimal,
    pub state: PositionState,
    /// Order the machine is waiting on while Entering or Exiting
    pub pending_order: Option<u64>,
    /// Reason of the latest exit attempt
    pub exit_reason: Option<ExitReason>,
}

/// Realized result of a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub strike: Decimal,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub reason: Option<ExitReason>,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

pub struct PositionMachine {
    position: Option<Position>,
    stops: StopConfig,
    contract_multiplier: Decimal,
    allow_reversals: bool,
}

impl PositionMachine {
    pub fn new(stops: StopConfig, contract_multiplier: Decimal, allow_reversals: bool) -> Self {
        Self {
            position: None,
            stops,
            contract_multiplier,
            allow_reversals,
        }
    }

    pub fn state(&self) -> PositionState {
        self.position
            .as_ref()
            .map_or(PositionState::Flat, |p| p.state)
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Order id the machine is waiting on, if any.
    pub fn pending_order(&self) -> Option<u64> {
        self.position.as_ref().and_then(|p| p.pending_order)
    }

    /// Flat -> Entering for a submitted Buy.
    pub fn begin_entry(&mut self, order_id: u64, intent: &OrderIntent) -> ScalperResult<()> {
        let state = self.state();
        if state != PositionState::Flat {
            return Err(ScalperError::PositionBusy { state });
        }

        self.position = Some(Position {
            symbol: intent.symbol.clone(),
            expiry: intent.expiry.clone(),
            direction: intent.direction,
            strike: intent.strike,
            quantity: intent.quantity,
            entry_price: Decimal::ZERO,
            stop_loss: Decimal::ZERO,
            profit_target: Decimal::ZERO,
            trailing_activation: Decimal::ZERO,
            highest: Decimal::ZERO,
            lowest: Decimal::ZERO,
            state: PositionState::Entering,
            pending_order: Some(order_id),
            exit_reason: None,
        });

        info!(
            order_id,
            symbol = %intent.symbol,
            strike = %intent.strike,
            direction = %intent.direction,
            "Position Flat -> Entering"
        );
        Ok(())
    }

    /// Entering -> InPosition. Stops are derived from the fill price.
    pub fn on_entry_filled(&mut self, order_id: u64, fill_price: Decimal) -> bool {
        let levels = calculate_stops(
            fill_price,
            self.stops.stop_loss_multiplier,
            self.stops.profit_target_multiplier,
        );
        let Some(position) = self.waiting_on(order_id, PositionState::Entering) else {
            return false;
        };

        position.entry_price = fill_price;
        position.highest = fill_price;
        position.lowest = fill_price;
        position.stop_loss = levels.stop_loss;
        position.profit_target = levels.profit_target;
        position.trailing_activation = levels.trailing_activation;
        position.state = PositionState::InPosition;
        position.pending_order = None;

        info!(
            order_id,
            symbol = %position.symbol,
            direction = %position.direction,
            strike = %position.strike,
            entry = %fill_price,
            stop = %levels.stop_loss,
            target = %levels.profit_target,
            trailing_activation = %levels.trailing_activation,
            "Position Entering -> InPosition"
        );
        true
    }

    /// Entering -> Flat after the Buy was rejected or cancelled.
    pub fn on_entry_failed(&mut self, order_id: u64, status: OrderStatus) -> bool {
        if self.waiting_on(order_id, PositionState::Entering).is_none() {
            return false;
        }
        self.position = None;
        warn!(order_id, ?status, "Position Entering -> Flat (entry order failed)");
        true
    }

    /// Feed the latest price to an open position. Returns the new stop if the
    /// trailing stop moved.
    pub fn mark(&mut self, price: Decimal) -> Option<Decimal> {
        let trailing_pct = self.stops.trailing_pct;
        let position = self
            .position
            .as_mut()
            .filter(|p| p.state == PositionState::InPosition)?;

        if price < position.lowest {
            position.lowest = price;
        }

        let candidate = update_trailing_stop(
            price,
            position.entry_price,
            &mut position.highest,
            trailing_pct,
        )?;
        if candidate <= position.stop_loss {
            return None;
        }

        let old_stop = position.stop_loss;
        position.stop_loss = candidate;
        info!(
            symbol = %position.symbol,
            %price,
            highest = %position.highest,
            old_stop = %old_stop,
            new_stop = %candidate,
            "Trailing stop raised"
        );
        Some(candidate)
    }

    /// First matching exit rule: target, then stop, then reversal.
    pub fn evaluate_exit(&self, price: Decimal, signal: MomentumSignal) -> Option<ExitReason> {
        let position = self
            .position
            .as_ref()
            .filter(|p| p.state == PositionState::InPosition)?;

        let reason = if price >= position.profit_target {
            ExitReason::Target
        } else if price <= position.stop_loss {
            ExitReason::Stop
        } else if self.allow_reversals && is_reversal(position.direction, signal) {
            ExitReason::Reversal
        } else {
            return None;
        };

        info!(
            symbol = %position.symbol,
            direction = %position.direction,
            %price,
            %signal,
            stop = %position.stop_loss,
            target = %position.profit_target,
            %reason,
            "Exit rule matched"
        );
        Some(reason)
    }

    /// InPosition -> Exiting for a submitted Sell.
    pub fn begin_exit(&mut self, order_id: u64, reason: ExitReason) -> bool {
        let state = self.state();
        let Some(position) = self
            .position
            .as_mut()
            .filter(|p| p.state == PositionState::InPosition)
        else {
            warn!(order_id, ?state, "Exit requested without an open position");
            return false;
        };

        position.state = PositionState::Exiting;
        position.pending_order = Some(order_id);
        position.exit_reason = Some(reason);
        info!(order_id, symbol = %position.symbol, %reason, "Position InPosition -> Exiting");
        true
    }

    /// Exiting -> Flat. Returns the realized trade.
    pub fn on_exit_filled(&mut self, order_id: u64, fill_price: Decimal) -> Option<ClosedTrade> {
        self.waiting_on(order_id, PositionState::Exiting)?;
        let position = self.position.take()?;

        let pnl = (fill_price - position.entry_price)
            * Decimal::from(position.quantity)
            * self.contract_multiplier;

        info!(
            order_id,
            symbol = %position.symbol,
            entry = %position.entry_price,
            exit = %fill_price,
            %pnl,
            "Position Exiting -> Flat"
        );

        Some(ClosedTrade {
            symbol: position.symbol,
            direction: position.direction,
            strike: position.strike,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: fill_price,
            pnl,
            reason: position.exit_reason,
        })
    }

    /// Exiting -> InPosition after the Sell was rejected or cancelled.
    pub fn on_exit_failed(&mut self, order_id: u64, status: OrderStatus) -> bool {
        let Some(position) = self.waiting_on(order_id, PositionState::Exiting) else {
            return false;
        };
        position.state = PositionState::InPosition;
        position.pending_order = None;
        warn!(order_id, ?status, "Position Exiting -> InPosition (exit order failed, retrying)");
        true
    }

    /// Adopt a fill for an order that had already been expired locally.
    ///
    /// A late Buy opens the position if the machine is still Flat. A late Sell
    /// closes the position it was sent for if that position is InPosition.
    /// Anything else cannot be reconciled and is logged.
    pub fn on_late_fill(
        &mut self,
        order_id: u64,
        intent: &OrderIntent,
        fill_price: Decimal,
    ) -> Option<ClosedTrade> {
        let state = self.state();
        match intent.action {
            OrderAction::Buy if state == PositionState::Flat => {
                warn!(order_id, %fill_price, "Adopting late entry fill");
                if self.begin_entry(order_id, intent).is_ok() {
                    self.on_entry_filled(order_id, fill_price);
                }
                None
            }
            OrderAction::Sell => {
                let Some(position) = self.position.as_mut().filter(|p| {
                    p.state == PositionState::InPosition
                        && p.symbol == intent.symbol
                        && p.strike == intent.strike
                        && p.direction == intent.direction
                }) else {
                    error!(
                        order_id,
                        ?state,
                        intent = %intent.describe(),
                        "Late exit fill does not match the position"
                    );
                    return None;
                };

                position.state = PositionState::Exiting;
                position.pending_order = Some(order_id);
                warn!(order_id, %fill_price, "Adopting late exit fill");
                self.on_exit_filled(order_id, fill_price)
            }
            OrderAction::Buy => {
                error!(
                    order_id,
                    ?state,
                    intent = %intent.describe(),
                    "Late entry fill while a position is live"
                );
                None
            }
        }
    }

    /// Route a tracker event to the matching transition.
    pub fn apply(&mut self, event: &OrderEvent) -> Option<ClosedTrade> {
        match event {
            OrderEvent::PositionFilled {
                order_id,
                fill_price,
            } => {
                self.on_entry_filled(*order_id, *fill_price);
                None
            }
            OrderEvent::PositionClosed {
                order_id,
                fill_price,
            } => self.on_exit_filled(*order_id, *fill_price),
            OrderEvent::OrderFailed { order_id, status } => {
                if !self.on_entry_failed(*order_id, *status) {
                    self.on_exit_failed(*order_id, *status);
                }
                None
            }
            OrderEvent::LateFill {
                order_id,
                intent,
                fill_price,
            } => self.on_late_fill(*order_id, intent, *fill_price),
        }
    }

    fn waiting_on(&mut self, order_id: u64, state: PositionState) -> Option<&mut Position> {
        let matched = self
            .position
            .as_mut()
            .filter(|p| p.state == state && p.pending_order == Some(order_id));
        if matched.is_none() {
            debug!(order_id, expected = ?state, "Order event does not match pending order");
        }
        matched
    }
}

fn is_reversal(direction: Direction, signal: MomentumSignal) -> bool {
    match direction {
        Direction::Call => matches!(
            signal,
            MomentumSignal::Bearish | MomentumSignal::ReversalDown
        ),
        Direction::Put => matches!(signal, MomentumSignal::Bullish | MomentumSignal::ReversalUp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_machine() -> PositionMachine {
        PositionMachine::new(StopConfig::default(), dec!(5), true)
    }

    fn buy(direction: Direction) -> OrderIntent {
        OrderIntent {
            action: OrderAction::Buy,
            symbol: "MES".to_string(),
            expiry: "202512".to_string(),
            strike: dec!(5000),
            direction,
            quantity: 1,
        }
    }

    fn open(machine: &mut PositionMachine, direction: Direction, fill: Decimal) {
        machine.begin_entry(1, &buy(direction)).unwrap();
        assert!(machine.on_entry_filled(1, fill));
    }

    #[test]
    fn test_entry_fill_sets_stops() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));

        let position = machine.position().unwrap();
        assert_eq!(position.state, PositionState::InPosition);
        assert_eq!(position.stop_loss, dec!(90));
        assert_eq!(position.profit_target, dec!(150));
        assert_eq!(position.trailing_activation, dec!(115));
        assert_eq!(position.highest, dec!(100));
        assert_eq!(position.lowest, dec!(100));
    }

    #[test]
    fn test_second_entry_is_refused() {
        let mut machine = create_machine();
        machine.begin_entry(1, &buy(Direction::Call)).unwrap();

        let err = machine.begin_entry(2, &buy(Direction::Put)).unwrap_err();
        assert!(matches!(
            err,
            ScalperError::PositionBusy {
                state: PositionState::Entering
            }
        ));
        assert_eq!(machine.pending_order(), Some(1));
    }

    #[test]
    fn test_rejected_entry_returns_to_flat() {
        let mut machine = create_machine();
        machine.begin_entry(1, &buy(Direction::Call)).unwrap();

        machine.apply(&OrderEvent::OrderFailed {
            order_id: 1,
            status: OrderStatus::Rejected,
        });
        assert_eq!(machine.state(), PositionState::Flat);
        assert!(machine.position().is_none());
    }

    #[test]
    fn test_events_for_other_orders_are_ignored() {
        let mut machine = create_machine();
        machine.begin_entry(1, &buy(Direction::Call)).unwrap();

        assert!(!machine.on_entry_filled(99, dec!(100)));
        machine.apply(&OrderEvent::OrderFailed {
            order_id: 99,
            status: OrderStatus::Cancelled,
        });
        assert_eq!(machine.state(), PositionState::Entering);
    }

    #[test]
    fn test_target_scenario() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));

        machine.mark(dec!(130));
        assert_eq!(machine.evaluate_exit(dec!(130), MomentumSignal::Neutral), None);

        machine.mark(dec!(150));
        assert_eq!(
            machine.evaluate_exit(dec!(150), MomentumSignal::Neutral),
            Some(ExitReason::Target)
        );
    }

    #[test]
    fn test_target_with_unit_multiplier() {
        let stops = StopConfig {
            profit_target_multiplier: dec!(1),
            ..StopConfig::default()
        };
        let mut machine = PositionMachine::new(stops, dec!(5), true);
        open(&mut machine, Direction::Call, dec!(100));

        assert_eq!(machine.position().unwrap().profit_target, dec!(125));
        machine.mark(dec!(130));
        assert_eq!(
            machine.evaluate_exit(dec!(130), MomentumSignal::Neutral),
            Some(ExitReason::Target)
        );
    }

    #[test]
    fn test_stop_after_trailing_update() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));

        // 120 * 0.92 = 110.40
        assert_eq!(machine.mark(dec!(120)), Some(dec!(110.40)));
        assert_eq!(machine.mark(dec!(115)), None);
        assert_eq!(
            machine.evaluate_exit(dec!(110), MomentumSignal::Bullish),
            Some(ExitReason::Stop)
        );
    }

    #[test]
    fn test_target_wins_over_reversal() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));
        assert_eq!(
            machine.evaluate_exit(dec!(150), MomentumSignal::ReversalDown),
            Some(ExitReason::Target)
        );
    }

    #[test]
    fn test_reversal_exit_by_direction() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));
        assert_eq!(
            machine.evaluate_exit(dec!(105), MomentumSignal::ReversalDown),
            Some(ExitReason::Reversal)
        );
        assert_eq!(machine.evaluate_exit(dec!(105), MomentumSignal::ReversalUp), None);

        let mut machine = create_machine();
        open(&mut machine, Direction::Put, dec!(100));
        assert_eq!(
            machine.evaluate_exit(dec!(105), MomentumSignal::Bullish),
            Some(ExitReason::Reversal)
        );
    }

    #[test]
    fn test_reversals_disabled() {
        let mut machine = PositionMachine::new(StopConfig::default(), dec!(5), false);
        open(&mut machine, Direction::Call, dec!(100));
        assert_eq!(machine.evaluate_exit(dec!(105), MomentumSignal::Bearish), None);
    }

    #[test]
    fn test_round_trip_realizes_pnl() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));

        assert!(machine.begin_exit(2, ExitReason::Target));
        assert_eq!(machine.state(), PositionState::Exiting);

        let trade = machine
            .apply(&OrderEvent::PositionClosed {
                order_id: 2,
                fill_price: dec!(126),
            })
            .unwrap();
        // (126 - 100) * 1 * 5
        assert_eq!(trade.pnl, dec!(130));
        assert!(trade.is_win());
        assert_eq!(trade.reason, Some(ExitReason::Target));
        assert_eq!(machine.state(), PositionState::Flat);
    }

    #[test]
    fn test_failed_exit_returns_to_position() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Put, dec!(100));
        machine.begin_exit(2, ExitReason::Stop);

        machine.apply(&OrderEvent::OrderFailed {
            order_id: 2,
            status: OrderStatus::Cancelled,
        });
        assert_eq!(machine.state(), PositionState::InPosition);
        assert_eq!(machine.pending_order(), None);
        assert!(machine.begin_exit(3, ExitReason::Stop));
    }

    #[test]
    fn test_late_exit_fill_closes_reverted_position() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));
        machine.begin_exit(2, ExitReason::Target);
        // Ack timeout reverted the exit
        machine.apply(&OrderEvent::OrderFailed {
            order_id: 2,
            status: OrderStatus::Cancelled,
        });

        let sell = OrderIntent {
            action: OrderAction::Sell,
            ..buy(Direction::Call)
        };
        let trade = machine
            .apply(&OrderEvent::LateFill {
                order_id: 2,
                intent: sell,
                fill_price: dec!(160),
            })
            .unwrap();
        // (160 - 100) * 1 * 5
        assert_eq!(trade.pnl, dec!(300));
        assert_eq!(trade.reason, Some(ExitReason::Target));
        assert_eq!(machine.state(), PositionState::Flat);
    }

    #[test]
    fn test_late_entry_fill_adopted_only_when_flat() {
        let mut machine = create_machine();
        machine.apply(&OrderEvent::LateFill {
            order_id: 7,
            intent: buy(Direction::Put),
            fill_price: dec!(20),
        });
        let position = machine.position().unwrap();
        assert_eq!(position.state, PositionState::InPosition);
        assert_eq!(position.direction, Direction::Put);
        assert_eq!(position.entry_price, dec!(20));

        // A second late Buy cannot open another position
        machine.apply(&OrderEvent::LateFill {
            order_id: 8,
            intent: buy(Direction::Call),
            fill_price: dec!(30),
        });
        assert_eq!(machine.position().unwrap().direction, Direction::Put);
        assert_eq!(machine.position().unwrap().entry_price, dec!(20));
    }

    #[test]
    fn test_late_exit_fill_for_other_contract_is_ignored() {
        let mut machine = create_machine();
        open(&mut machine, Direction::Call, dec!(100));

        let other = OrderIntent {
            action: OrderAction::Sell,
            strike: dec!(5100),
            ..buy(Direction::Call)
        };
        assert!(machine
            .apply(&OrderEvent::LateFill {
                order_id: 9,
                intent: other,
                fill_price: dec!(120),
            })
            .is_none());
        assert_eq!(machine.state(), PositionState::InPosition);
    }

    #[test]
    fn test_no_exit_evaluation_while_entering() {
        let mut machine = create_machine();
        machine.begin_entry(1, &buy(Direction::Call)).unwrap();
        assert_eq!(machine.mark(dec!(500)), None);
        assert_eq!(machine.evaluate_exit(dec!(500), MomentumSignal::Neutral), None);
        assert!(!machine.begin_exit(2, ExitReason::Target));
    }
}
