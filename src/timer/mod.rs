mod state;

pub use state::{Countdown, TickOutcome};
