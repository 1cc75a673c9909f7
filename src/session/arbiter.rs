use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::sensing::{
    face::PresenceDetector, DistractionReason, DistractionSignal, SessionContext,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// An open verification gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub reason: DistractionReason,
    pub opened_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Opened(Gate),
    AlreadyGated,
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// A face was found in the latest frame.
    Verified,
    /// Presence could not be checked; the gate was opened anyway.
    Unverifiable,
    /// Nothing found. The gate stays up.
    StillAbsent,
    NotGated,
}

impl VerifyOutcome {
    pub fn closed_gate(self) -> bool {
        matches!(self, VerifyOutcome::Verified | VerifyOutcome::Unverifiable)
    }
}

/// Normal/Gated state machine fed with monitor signals on the driver task.
///
/// At most one gate is open at a time, and a new gate needs `cooldown` since
/// the previous one opened. Only [`Arbiter::verify`] and [`Arbiter::dismiss`]
/// close a gate.
#[derive(Debug)]
pub struct Arbiter {
    gate: Option<Gate>,
    last_gate_at: Option<Instant>,
    cooldown: Duration,
    inactivity_timeout: Option<Duration>,
}

impl Arbiter {
    pub fn new(cooldown: Duration, inactivity_timeout: Option<Duration>) -> Self {
        Self {
            gate: None,
            last_gate_at: None,
            cooldown,
            inactivity_timeout,
        }
    }

    pub fn gate(&self) -> Option<Gate> {
        self.gate
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    pub fn on_signal(&mut self, signal: DistractionSignal, now: Instant) -> SignalOutcome {
        if self.gate.is_some() {
            log_debug!("{} suppressed: gate already open", signal.reason);
            return SignalOutcome::AlreadyGated;
        }

        if let Some(last) = self.last_gate_at {
            if now.saturating_duration_since(last) < self.cooldown {
                log_debug!("{} suppressed: gate cooldown", signal.reason);
                return SignalOutcome::CoolingDown;
            }
        }

        let gate = Gate {
            reason: signal.reason,
            opened_at: now,
        };
        self.gate = Some(gate);
        self.last_gate_at = Some(now);
        log_info!("distraction gate opened: {}", signal.reason);
        SignalOutcome::Opened(gate)
    }

    /// Inactivity only counts while an input hook is feeding the activity
    /// clock and a timeout is configured.
    pub fn check_inactivity(&self, ctx: &SessionContext, now: Instant) -> Option<DistractionSignal> {
        let timeout = self.inactivity_timeout?;
        if self.gate.is_some() || !ctx.input_available() {
            return None;
        }
        (ctx.since_activity(now) > timeout).then(|| DistractionSignal {
            reason: DistractionReason::Inactivity,
            raised_at: now,
        })
    }

    /// Re-checks presence on the most recent frame. Fails open whenever the
    /// check itself cannot run.
    pub fn verify(
        &mut self,
        ctx: &SessionContext,
        detector: &dyn PresenceDetector,
        now: Instant,
    ) -> VerifyOutcome {
        if self.gate.is_none() {
            return VerifyOutcome::NotGated;
        }

        let frame = if ctx.presence_available() {
            ctx.frame_snapshot()
        } else {
            None
        };

        let outcome = match frame {
            None => VerifyOutcome::Unverifiable,
            Some(frame) => match detector.detect(&frame) {
                Ok(regions) if regions.is_empty() => VerifyOutcome::StillAbsent,
                Ok(_) => VerifyOutcome::Verified,
                Err(err) => {
                    log_warn!("verification check failed, letting the user back in: {err:#}");
                    VerifyOutcome::Unverifiable
                }
            },
        };

        match outcome {
            VerifyOutcome::Verified => {
                ctx.mark_presence(now);
                ctx.mark_activity(now);
                self.close("verified");
            }
            VerifyOutcome::Unverifiable => {
                ctx.mark_activity(now);
                self.close("unverifiable");
            }
            _ => log_info!("verification found nobody; gate stays open"),
        }
        outcome
    }

    /// "I'm back". Returns false when no gate was open.
    pub fn dismiss(&mut self, ctx: &SessionContext, now: Instant) -> bool {
        if self.gate.is_none() {
            return false;
        }
        ctx.mark_activity(now);
        self.close("dismissed");
        true
    }

    fn close(&mut self, how: &str) {
        if let Some(gate) = self.gate.take() {
            log_info!("distraction gate ({}) closed: {how}", gate.reason);
        }
    }
}
