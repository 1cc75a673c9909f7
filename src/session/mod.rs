//! Session lifecycle: one driver task per focus session owns the countdown,
//! the distraction arbiter and the monitors it started.

pub mod arbiter;
mod controller;
mod runtime;
mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use arbiter::{Arbiter, Gate, SignalOutcome, VerifyOutcome};
pub use controller::{SessionConfig, SessionController, SessionHandle, SessionRequest};
pub use runtime::{
    GateResolution, SessionEvent, SessionOutcome, SessionPhase, SessionSnapshot,
};
pub use store::SessionStore;
