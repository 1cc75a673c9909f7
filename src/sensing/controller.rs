use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use log::{error, info};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    capabilities::Capabilities,
    context::SessionContext,
    input::InputMonitor,
    presence::PresenceMonitor,
    signal::DistractionSignal,
    window::{AllowList, WindowMonitor},
    MonitorTimings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Presence,
    Input,
    Window,
}

/// Liveness and last observation of one monitor task.
#[derive(Debug, Default)]
pub struct MonitorStatus {
    running: AtomicBool,
    last_observation: Mutex<Option<Instant>>,
}

impl MonitorStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_observation(&self) -> Option<Instant> {
        match self.last_observation.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn observe(&self, at: Instant) {
        match self.last_observation.lock() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
    }
}

/// Clears the running flag however the task exits.
struct RunningGuard(Arc<MonitorStatus>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub struct MonitorHandle {
    kind: MonitorKind,
    status: Arc<MonitorStatus>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn status(&self) -> Arc<MonitorStatus> {
        Arc::clone(&self.status)
    }
}

/// Everything a session hands to its monitors.
pub struct SensingPlan {
    pub ctx: Arc<SessionContext>,
    pub signals: mpsc::UnboundedSender<DistractionSignal>,
    pub timings: MonitorTimings,
    pub allow_list: AllowList,
}

/// Owns the monitors of one session and the cancellation token they share.
/// Only `stop_sensing` cancels it.
pub struct SensingController {
    cancel_token: Option<CancellationToken>,
    monitors: Vec<MonitorHandle>,
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            cancel_token: None,
            monitors: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel_token.is_some()
    }

    /// Starts every monitor the capabilities allow. Returns the kinds started.
    pub fn start_sensing(
        &mut self,
        capabilities: &Capabilities,
        plan: SensingPlan,
    ) -> Result<Vec<MonitorKind>> {
        if self.is_active() {
            bail!("sensing already active");
        }

        let cancel_token = CancellationToken::new();

        if let Some(device) = capabilities.camera.clone() {
            let status = Arc::new(MonitorStatus::default());
            let monitor = PresenceMonitor {
                device,
                detector: Arc::clone(&capabilities.detector),
                ctx: Arc::clone(&plan.ctx),
                signals: plan.signals.clone(),
                timings: plan.timings,
                status: Arc::clone(&status),
            };
            self.spawn(MonitorKind::Presence, status, &cancel_token, move |token| {
                monitor.run(token)
            });
        }

        if let Some(hook) = capabilities.input.clone() {
            let status = Arc::new(MonitorStatus::default());
            let monitor = InputMonitor {
                hook,
                ctx: Arc::clone(&plan.ctx),
                status: Arc::clone(&status),
            };
            self.spawn(MonitorKind::Input, status, &cancel_token, move |token| {
                monitor.run(token)
            });
        }

        match capabilities.window.clone() {
            Some(inspector) if !plan.allow_list.is_empty() => {
                let status = Arc::new(MonitorStatus::default());
                let monitor = WindowMonitor {
                    inspector,
                    allow_list: plan.allow_list.clone(),
                    signals: plan.signals.clone(),
                    timings: plan.timings,
                    status: Arc::clone(&status),
                };
                self.spawn(MonitorKind::Window, status, &cancel_token, move |token| {
                    monitor.run(token)
                });
            }
            Some(_) => info!("window monitor idle: allow-list is empty"),
            None if !plan.allow_list.is_empty() => {
                info!("window monitor unavailable; allow-list ignored")
            }
            None => {}
        }

        self.cancel_token = Some(cancel_token);
        let kinds = self.monitors.iter().map(MonitorHandle::kind).collect();
        info!("sensing started with monitors {:?}", kinds);
        Ok(kinds)
    }

    fn spawn<F, Fut>(
        &mut self,
        kind: MonitorKind,
        status: Arc<MonitorStatus>,
        cancel_token: &CancellationToken,
        monitor: F,
    ) where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        status.running.store(true, Ordering::Release);
        let guard = RunningGuard(Arc::clone(&status));
        let future = monitor(cancel_token.clone());
        let task = tokio::spawn(async move {
            let _guard = guard;
            future.await;
        });
        self.monitors.push(MonitorHandle {
            kind,
            status,
            task: Some(task),
        });
    }

    /// Cancels every monitor and waits for each to exit. Presence is joined
    /// first so the camera is released before input listeners are dropped.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        let Some(token) = self.cancel_token.take() else {
            return Ok(());
        };
        token.cancel();

        self.monitors.sort_by_key(|handle| match handle.kind {
            MonitorKind::Presence => 0,
            MonitorKind::Input => 1,
            MonitorKind::Window => 2,
        });

        let mut failures = Vec::new();
        for handle in self.monitors.iter_mut() {
            if let Some(task) = handle.task.take() {
                if let Err(err) = task.await {
                    error!("{:?} monitor task failed to join: {err}", handle.kind);
                    failures.push(handle.kind);
                }
            }
        }

        info!("sensing stopped");
        if !failures.is_empty() {
            bail!("monitor tasks failed to join: {:?}", failures);
        }
        Ok(())
    }

    pub fn statuses(&self) -> Vec<(MonitorKind, Arc<MonitorStatus>)> {
        self.monitors
            .iter()
            .map(|handle| (handle.kind, handle.status()))
            .collect()
    }

    pub fn any_running(&self) -> bool {
        self.monitors.iter().any(|handle| handle.status.is_running())
    }
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SensingController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
