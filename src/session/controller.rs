use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::{
    arbiter::{Arbiter, VerifyOutcome},
    runtime::{SessionEvent, SessionOutcome, SessionPhase, SessionRuntime, SessionSnapshot},
    store::SessionStore,
};
use crate::{
    sensing::{
        preview::PreviewSurface, AllowList, Capabilities, DistractionSignal, MonitorTimings,
        SensingController, SensingPlan, SessionContext,
    },
    settings::UserSettings,
    timer::Countdown,
    utils::debug_mode,
};

/// Process-wide knobs for every session started by a controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub timings: MonitorTimings,
    pub inactivity_timeout: Option<Duration>,
    /// Persist elapsed time every this many ticks.
    pub heartbeat_every_ticks: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timings: MonitorTimings::default(),
            inactivity_timeout: None,
            heartbeat_every_ticks: 10,
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            timings: settings.timings.to_timings(),
            inactivity_timeout: settings.inactivity_timeout(),
            heartbeat_every_ticks: if debug_mode() { 1 } else { 10 },
        }
    }
}

pub struct SessionRequest {
    pub user_id: Option<i64>,
    pub topic: String,
    pub duration_secs: u64,
    pub allow_list: AllowList,
    pub preview: Option<Box<dyn PreviewSurface>>,
}

impl SessionRequest {
    pub fn new(
        user_id: impl Into<Option<i64>>,
        topic: impl Into<String>,
        duration_secs: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            topic: topic.into(),
            duration_secs,
            allow_list: AllowList::default(),
            preview: None,
        }
    }

    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSurface>) -> Self {
        self.preview = Some(preview);
        self
    }
}

enum SessionCommand {
    LogDistraction {
        reply: oneshot::Sender<u32>,
    },
    Verify {
        reply: oneshot::Sender<VerifyOutcome>,
    },
    Dismiss {
        reply: oneshot::Sender<bool>,
    },
    EndEarly {
        distractions: Option<u32>,
        reply: oneshot::Sender<SessionOutcome>,
    },
}

/// Clears the controller's busy flag when the driver task ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Starts sessions, one at a time.
pub struct SessionController<S> {
    store: Arc<S>,
    capabilities: Capabilities,
    config: SessionConfig,
    active: Arc<AtomicBool>,
}

impl<S: SessionStore> SessionController<S> {
    pub fn new(store: Arc<S>, capabilities: Capabilities, config: SessionConfig) -> Self {
        Self {
            store,
            capabilities,
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Persists a new session, starts the monitors the capabilities allow and
    /// hands the session to its own driver task.
    pub async fn start(&self, request: SessionRequest) -> Result<SessionHandle> {
        if request.duration_secs == 0 {
            bail!("session duration must be greater than zero");
        }
        if self.active.swap(true, Ordering::AcqRel) {
            bail!("a session is already running");
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let topic = match request.topic.trim() {
            "" => "Focus session".to_string(),
            topic => topic.to_string(),
        };

        let session_id = match self
            .store
            .create_session(request.user_id, &topic, request.duration_secs)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                error!("Failed to create session record, continuing unsaved: {err:#}");
                None
            }
        };

        let timings = self.config.timings;
        let ctx = Arc::new(SessionContext::new(Instant::now()));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel::<DistractionSignal>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let mut sensing = SensingController::new();
        sensing
            .start_sensing(
                &self.capabilities,
                SensingPlan {
                    ctx: Arc::clone(&ctx),
                    signals: signals_tx,
                    timings,
                    allow_list: request.allow_list,
                },
            )
            .context("failed to start monitors")?;

        let mut runtime = SessionRuntime {
            store: Arc::clone(&self.store),
            session_id,
            topic,
            countdown: Countdown::new(request.duration_secs),
            arbiter: Arbiter::new(timings.gate_cooldown, self.config.inactivity_timeout),
            ctx,
            detector: Arc::clone(&self.capabilities.detector),
            sensing,
            preview: request.preview,
            distractions: 0,
            ended_early: false,
            phase: SessionPhase::Created,
            ticks: 0,
            heartbeat_every: self.config.heartbeat_every_ticks.max(1),
            outcome: None,
            events: events_tx,
            snapshot: snapshot_tx,
        };
        runtime.phase = SessionPhase::Running;
        runtime.publish();

        info!(
            "session {:?} started: `{}` for {}s",
            session_id,
            runtime.topic,
            request.duration_secs
        );

        let driver = tokio::spawn(drive(runtime, signals_rx, commands_rx, timings.tick, guard));

        Ok(SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: Some(events_rx),
            driver,
        })
    }
}

/// The session's scheduling loop. Ticks, monitor signals and user commands
/// are all handled here, one at a time.
async fn drive<S: SessionStore>(
    mut runtime: SessionRuntime<S>,
    mut signals: mpsc::UnboundedReceiver<DistractionSignal>,
    mut commands: mpsc::Receiver<SessionCommand>,
    tick: Duration,
    _guard: ActiveGuard,
) -> SessionOutcome {
    let mut interval = time::interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut end_reply = None;

    loop {
        tokio::select! {
            biased;
            _ = interval.tick() => {
                if runtime.on_tick(&mut signals, Instant::now()).await {
                    break;
                }
            }
            command = commands.recv() => match command {
                Some(SessionCommand::LogDistraction { reply }) => {
                    let count = runtime.log_distraction().await;
                    let _ = reply.send(count);
                }
                Some(SessionCommand::Verify { reply }) => {
                    let _ = reply.send(runtime.verify(Instant::now()));
                }
                Some(SessionCommand::Dismiss { reply }) => {
                    let _ = reply.send(runtime.dismiss(Instant::now()));
                }
                Some(SessionCommand::EndEarly { distractions, reply }) => {
                    runtime.end_early(distractions).await;
                    end_reply = Some(reply);
                    break;
                }
                None => {
                    info!("all session handles dropped; ending early");
                    runtime.end_early(None).await;
                    break;
                }
            }
        }
    }

    let outcome = runtime.finish().await;
    if let Some(reply) = end_reply {
        let _ = reply.send(outcome.clone());
    }
    outcome
}

/// Front-end side of a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    driver: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| anyhow!("session already finished"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("session finished before replying"))
    }

    /// Records a distraction the user noticed themselves. Returns the new total.
    pub async fn log_distraction(&self) -> Result<u32> {
        self.request(|reply| SessionCommand::LogDistraction { reply })
            .await
    }

    pub async fn verify(&self) -> Result<VerifyOutcome> {
        self.request(|reply| SessionCommand::Verify { reply }).await
    }

    pub async fn dismiss(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::Dismiss { reply }).await
    }

    pub async fn end_early(&self, distractions: Option<u32>) -> Result<SessionOutcome> {
        self.request(|reply| SessionCommand::EndEarly {
            distractions,
            reply,
        })
        .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// The event stream can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// Waits for the session to end on its own and returns its outcome.
    pub async fn wait(self) -> Result<SessionOutcome> {
        let SessionHandle {
            commands, driver, ..
        } = self;
        let outcome = driver.await.context("session driver task failed");
        drop(commands);
        outcome
    }
}
