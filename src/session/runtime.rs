use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::error;
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use super::{
    arbiter::{Arbiter, SignalOutcome, VerifyOutcome},
    store::SessionStore,
};
use crate::{
    sensing::{
        face::PresenceDetector, preview::PreviewSurface, DistractionReason, DistractionSignal,
        MonitorKind, SensingController, SessionContext,
    },
    timer::{Countdown, TickOutcome},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Created,
    Running,
    Completed,
    Aborted,
}

/// What a front-end needs to render a running session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<i64>,
    pub topic: String,
    pub phase: SessionPhase,
    pub total_secs: u64,
    pub remaining_secs: u64,
    pub progress: f64,
    pub distractions: u32,
    pub gate: Option<DistractionReason>,
    pub monitors: Vec<MonitorKind>,
    pub presence_available: bool,
    pub input_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateResolution {
    Verified,
    Unverifiable,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Tick { remaining_secs: u64 },
    GateOpened { reason: DistractionReason, distractions: u32 },
    GateClosed { resolution: GateResolution },
    DistractionLogged { distractions: u32 },
    Finished(SessionOutcome),
}

/// Final result of a session as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub session_id: Option<i64>,
    pub topic: String,
    pub planned_secs: u64,
    pub elapsed_secs: u64,
    pub distractions: u32,
    pub completed: bool,
    pub ended_early: bool,
    pub ended_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn verdict(&self) -> &'static str {
        match (self.completed, self.distractions) {
            (true, 0) => "Perfect focus",
            (true, _) => "Nice work",
            (false, _) => "Good effort",
        }
    }
}

/// Session state owned by the driver task. Nothing here is shared: monitors
/// only reach it through the signal queue and the [`SessionContext`].
pub(crate) struct SessionRuntime<S> {
    pub(crate) store: Arc<S>,
    pub(crate) session_id: Option<i64>,
    pub(crate) topic: String,
    pub(crate) countdown: Countdown,
    pub(crate) arbiter: Arbiter,
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) detector: Arc<dyn PresenceDetector>,
    pub(crate) sensing: SensingController,
    pub(crate) preview: Option<Box<dyn PreviewSurface>>,
    pub(crate) distractions: u32,
    pub(crate) ended_early: bool,
    pub(crate) phase: SessionPhase,
    pub(crate) ticks: u64,
    pub(crate) heartbeat_every: u64,
    pub(crate) outcome: Option<SessionOutcome>,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) snapshot: watch::Sender<SessionSnapshot>,
}

impl<S: SessionStore> SessionRuntime<S> {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            topic: self.topic.clone(),
            phase: self.phase,
            total_secs: self.countdown.total_secs(),
            remaining_secs: self.countdown.remaining_secs(),
            progress: self.countdown.progress(),
            distractions: self.distractions,
            gate: self.arbiter.gate().map(|gate| gate.reason),
            monitors: self
                .sensing
                .statuses()
                .into_iter()
                .filter(|(_, status)| status.is_running())
                .map(|(kind, _)| kind)
                .collect(),
            presence_available: self.ctx.presence_available(),
            input_available: self.ctx.input_available(),
        }
    }

    pub(crate) fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        // A front-end that stopped listening is not an error.
        let _ = self.events.send(event);
    }

    /// One scheduling step: drain monitor signals, then advance the countdown.
    /// Returns true once the countdown has reached zero.
    pub(crate) async fn on_tick(
        &mut self,
        signals: &mut mpsc::UnboundedReceiver<DistractionSignal>,
        now: Instant,
    ) -> bool {
        while let Ok(signal) = signals.try_recv() {
            self.raise(signal, now).await;
        }
        if let Some(signal) = self.arbiter.check_inactivity(&self.ctx, now) {
            self.raise(signal, now).await;
        }

        let finished = match self.countdown.tick() {
            TickOutcome::Running { remaining_secs } => {
                self.emit(SessionEvent::Tick { remaining_secs });
                false
            }
            TickOutcome::Finished => {
                self.emit(SessionEvent::Tick { remaining_secs: 0 });
                true
            }
            TickOutcome::Idle => true,
        };

        self.ticks += 1;
        if !finished && self.ticks % self.heartbeat_every == 0 {
            self.heartbeat().await;
        }

        self.publish();
        finished
    }

    async fn heartbeat(&mut self) {
        let Some(session_id) = self.session_id else {
            return;
        };
        let elapsed = self.countdown.elapsed_secs();
        log_debug!(
            "heartbeat for session {session_id}: {elapsed}s elapsed, {} distractions",
            self.distractions
        );
        if let Err(err) = self
            .store
            .update_session_progress(session_id, elapsed)
            .await
        {
            error!("Failed to record progress for session {session_id}: {err:#}");
        }
    }

    pub(crate) async fn raise(&mut self, signal: DistractionSignal, now: Instant) {
        if let SignalOutcome::Opened(gate) = self.arbiter.on_signal(signal, now) {
            self.distractions += 1;
            self.persist_distractions().await;
            self.emit(SessionEvent::GateOpened {
                reason: gate.reason,
                distractions: self.distractions,
            });
            self.publish();
        }
    }

    pub(crate) async fn log_distraction(&mut self) -> u32 {
        self.distractions += 1;
        log_info!("distraction logged by user ({} total)", self.distractions);
        self.persist_distractions().await;
        self.emit(SessionEvent::DistractionLogged {
            distractions: self.distractions,
        });
        self.publish();
        self.distractions
    }

    pub(crate) fn verify(&mut self, now: Instant) -> VerifyOutcome {
        let outcome = self.arbiter.verify(&self.ctx, self.detector.as_ref(), now);
        let resolution = match outcome {
            VerifyOutcome::Verified => Some(GateResolution::Verified),
            VerifyOutcome::Unverifiable => Some(GateResolution::Unverifiable),
            VerifyOutcome::StillAbsent | VerifyOutcome::NotGated => None,
        };
        if let Some(resolution) = resolution {
            self.emit(SessionEvent::GateClosed { resolution });
            self.publish();
        }
        outcome
    }

    pub(crate) fn dismiss(&mut self, now: Instant) -> bool {
        let closed = self.arbiter.dismiss(&self.ctx, now);
        if closed {
            self.emit(SessionEvent::GateClosed {
                resolution: GateResolution::Dismissed,
            });
            self.publish();
        }
        closed
    }

    /// Marks the session as abandoned. An override replaces the tally.
    pub(crate) async fn end_early(&mut self, distractions: Option<u32>) {
        if self.outcome.is_some() {
            return;
        }
        self.ended_early = true;
        if let Some(count) = distractions {
            log_info!(
                "ending early; distraction count {} -> {count}",
                self.distractions
            );
            self.distractions = count;
            self.persist_distractions().await;
        } else {
            log_info!("ending early with {} distractions", self.distractions);
        }
    }

    /// Stops every monitor, closes the preview and persists the result.
    /// Safe to call more than once; later calls return the first outcome.
    pub(crate) async fn finish(&mut self) -> SessionOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        // Presence is joined first inside stop_sensing, which releases the
        // camera before input listeners are dropped.
        if let Err(err) = self.sensing.stop_sensing().await {
            error!("Monitors did not shut down cleanly: {err:#}");
        }
        self.ctx.clear_frame();
        if let Some(mut preview) = self.preview.take() {
            preview.close();
        }

        let completed = !self.ended_early && self.countdown.is_finished();
        let outcome = SessionOutcome {
            session_id: self.session_id,
            topic: self.topic.clone(),
            planned_secs: self.countdown.total_secs(),
            elapsed_secs: self.countdown.elapsed_secs(),
            distractions: self.distractions,
            completed,
            ended_early: self.ended_early,
            ended_at: Utc::now(),
        };

        if let Some(session_id) = self.session_id {
            if let Err(err) = self
                .store
                .finalize_session(session_id, outcome.elapsed_secs, completed, outcome.ended_at)
                .await
            {
                error!("Failed to finalize session {session_id}: {err:#}");
            }
        }

        self.phase = if completed {
            SessionPhase::Completed
        } else {
            SessionPhase::Aborted
        };
        self.outcome = Some(outcome.clone());
        log_info!(
            "session finished: {}s of {}s, {} distractions, completed={}",
            outcome.elapsed_secs,
            outcome.planned_secs,
            outcome.distractions,
            outcome.completed
        );

        self.emit(SessionEvent::Finished(outcome.clone()));
        self.publish();
        outcome
    }

    async fn persist_distractions(&mut self) {
        let Some(session_id) = self.session_id else {
            return;
        };
        if let Err(err) = self
            .store
            .update_session_distractions(session_id, self.distractions)
            .await
        {
            error!("Failed to persist distraction count for session {session_id}: {err:#}");
        }
    }
}
