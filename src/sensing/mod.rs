pub mod camera;
pub mod capabilities;
pub mod context;
pub mod controller;
pub mod face;
pub mod input;
mod presence;
pub mod preview;
pub mod signal;
mod timings;
pub mod window;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use capabilities::Capabilities;
pub use context::SessionContext;
pub use controller::{MonitorKind, MonitorStatus, SensingController, SensingPlan};
pub use signal::{DistractionReason, DistractionSignal};
pub use timings::MonitorTimings;
pub use window::AllowList;

/// Sleeps unless cancelled first. Returns false on cancellation.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
