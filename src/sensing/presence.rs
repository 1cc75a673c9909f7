use std::sync::Arc;

use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    camera::{CaptureDevice, CaptureGuard, Frame},
    context::SessionContext,
    controller::MonitorStatus,
    face::{has_presence, PresenceDetector},
    signal::{DistractionReason, DistractionSignal},
    sleep_or_cancel, MonitorTimings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub(crate) struct PresenceMonitor {
    pub device: Arc<dyn CaptureDevice>,
    pub detector: Arc<dyn PresenceDetector>,
    pub ctx: Arc<SessionContext>,
    pub signals: mpsc::UnboundedSender<DistractionSignal>,
    pub timings: MonitorTimings,
    pub status: Arc<MonitorStatus>,
}

enum Sample {
    Present,
    Absent,
    Unreadable,
}

impl PresenceMonitor {
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.device.open() => opened,
        };

        let source = match opened {
            Ok(source) => source,
            Err(err) => {
                log_warn!("presence checks disabled for this session: {err:#}");
                self.ctx.set_presence_available(false);
                return;
            }
        };

        let mut capture = CaptureGuard::new(source);
        self.ctx.set_presence_available(true);
        log_info!("presence monitor started ({})", self.device.name());

        if self.await_initial_presence(&mut capture, &cancel).await {
            self.watch(&mut capture, &cancel).await;
        }

        capture.release();
        self.ctx.set_presence_available(false);
        log_info!("presence monitor stopped, camera released");
    }

    /// Looks for a first face during the grace window. The missing clock
    /// starts when a face is found or the window runs out, whichever is first.
    /// Returns false if cancelled.
    async fn await_initial_presence(
        &self,
        capture: &mut CaptureGuard,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = Instant::now() + self.timings.presence_grace;

        while Instant::now() < deadline {
            let sample = tokio::select! {
                _ = cancel.cancelled() => return false,
                sample = self.sample(capture, true) => sample,
            };

            match sample {
                Sample::Present => return true,
                Sample::Unreadable => {
                    if !sleep_or_cancel(cancel, self.timings.capture_retry).await {
                        return false;
                    }
                }
                Sample::Absent => {
                    if !sleep_or_cancel(cancel, self.timings.presence_poll).await {
                        return false;
                    }
                }
            }
        }

        log_debug!("no face during grace window; starting missing clock now");
        self.ctx.mark_presence(Instant::now());
        true
    }

    async fn watch(&self, capture: &mut CaptureGuard, cancel: &CancellationToken) {
        loop {
            let sample = tokio::select! {
                _ = cancel.cancelled() => return,
                sample = self.sample(capture, false) => sample,
            };

            if let Sample::Unreadable = sample {
                if !sleep_or_cancel(cancel, self.timings.capture_retry).await {
                    return;
                }
                continue;
            }

            let now = Instant::now();
            if self.ctx.since_presence(now) > self.timings.presence_missing_threshold {
                log_info!(
                    "no presence for {:?}; signalling",
                    self.ctx.since_presence(now)
                );
                if self
                    .signals
                    .send(DistractionSignal::now(DistractionReason::NoPresence))
                    .is_err()
                {
                    return;
                }
                if !sleep_or_cancel(cancel, self.timings.presence_cooldown).await {
                    return;
                }
            }

            if !sleep_or_cancel(cancel, self.timings.presence_poll).await {
                return;
            }
        }
    }

    /// Grabs one frame, publishes it and updates the presence timestamp.
    /// During the grace window any detected region counts; afterwards the
    /// region must clear the minimum area.
    async fn sample(&self, capture: &mut CaptureGuard, lenient: bool) -> Sample {
        let frame = match capture.capture().await {
            Ok(frame) => frame,
            Err(err) => {
                log_debug!("frame read failed: {err:#}");
                return Sample::Unreadable;
            }
        };

        let found = self.detect(&frame, lenient);
        self.ctx.store_frame(frame);

        let now = Instant::now();
        self.status.observe(now);
        if found {
            self.ctx.mark_presence(now);
            self.ctx.mark_activity(now);
            Sample::Present
        } else {
            Sample::Absent
        }
    }

    fn detect(&self, frame: &Frame, lenient: bool) -> bool {
        match self.detector.detect(frame) {
            Ok(regions) if lenient => !regions.is_empty(),
            Ok(regions) => {
                has_presence(&regions, frame, self.timings.presence_min_area_fraction)
            }
            Err(err) => {
                log_debug!("presence detection failed: {err:#}");
                false
            }
        }
    }
}
