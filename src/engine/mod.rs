//! Session engine: shared state plus the orchestrating loop.

mod scalper;
mod state;

pub use scalper::{CycleOutcome, ScalpingEngine};
pub use state::SessionState;
