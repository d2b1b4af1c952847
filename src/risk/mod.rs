//! Risk management for the scalping session.
//!
//! Provides:
//! - Session performance counters with daily rollover
//! - Entry gates (trade count, daily loss, cooldown) with backoff

mod governor;
mod session;

pub use governor::{GateDecision, RiskGovernor};
pub use session::SessionStats;
