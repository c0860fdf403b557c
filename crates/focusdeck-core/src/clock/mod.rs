mod driver;
mod engine;
mod mode;
mod state;

pub use driver::ClockDriver;
pub use engine::{format_remaining, now_ms, reset_sessions, ClockSnapshot, SessionClock};
pub use mode::{Durations, Mode};
pub use state::{reconcile, tick, Reconciled, SessionState, TickResult};
