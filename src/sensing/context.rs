use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::time::Instant;

use super::camera::Frame;

/// Cross-task state for one session.
///
/// Monitors write the timestamps and the latest frame; the session driver
/// reads them. Timestamps are stored as millisecond offsets from the session
/// epoch so they fit in atomics.
pub struct SessionContext {
    epoch: Instant,
    last_activity_ms: AtomicU64,
    last_presence_ms: AtomicU64,
    latest_frame: Mutex<Option<Arc<Frame>>>,
    presence_available: AtomicBool,
    input_available: AtomicBool,
}

impl SessionContext {
    pub fn new(now: Instant) -> Self {
        Self {
            epoch: now,
            last_activity_ms: AtomicU64::new(0),
            last_presence_ms: AtomicU64::new(0),
            latest_frame: Mutex::new(None),
            presence_available: AtomicBool::new(false),
            input_available: AtomicBool::new(false),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn since(&self, stored_ms: u64, now: Instant) -> Duration {
        let stamp = self.epoch + Duration::from_millis(stored_ms);
        now.saturating_duration_since(stamp)
    }

    pub fn mark_activity(&self, at: Instant) {
        self.last_activity_ms
            .fetch_max(self.offset(at), Ordering::Release);
    }

    pub fn mark_presence(&self, at: Instant) {
        self.last_presence_ms
            .fetch_max(self.offset(at), Ordering::Release);
    }

    pub fn since_activity(&self, now: Instant) -> Duration {
        self.since(self.last_activity_ms.load(Ordering::Acquire), now)
    }

    pub fn since_presence(&self, now: Instant) -> Duration {
        self.since(self.last_presence_ms.load(Ordering::Acquire), now)
    }

    pub fn last_presence(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_presence_ms.load(Ordering::Acquire))
    }

    /// Replaces the latest frame. Readers holding an earlier snapshot keep it.
    pub fn store_frame(&self, frame: Frame) {
        let frame = Arc::new(frame);
        match self.latest_frame.lock() {
            Ok(mut guard) => *guard = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
    }

    pub fn frame_snapshot(&self) -> Option<Arc<Frame>> {
        match self.latest_frame.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear_frame(&self) {
        match self.latest_frame.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn set_presence_available(&self, available: bool) {
        self.presence_available.store(available, Ordering::Release);
    }

    pub fn presence_available(&self) -> bool {
        self.presence_available.load(Ordering::Acquire)
    }

    pub fn set_input_available(&self, available: bool) {
        self.input_available.store(available, Ordering::Release);
    }

    pub fn input_available(&self) -> bool {
        self.input_available.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[tokio::test(start_paused = true)]
    async fn timestamps_start_at_epoch_and_never_move_backwards() {
        let start = Instant::now();
        let ctx = SessionContext::new(start);
        assert_eq!(ctx.since_presence(start), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        let later = Instant::now();
        assert_eq!(ctx.since_presence(later), Duration::from_secs(5));

        ctx.mark_presence(later);
        ctx.mark_presence(start);
        assert_eq!(ctx.last_presence(), later);
        assert_eq!(ctx.since_activity(later), Duration::from_secs(5));
    }

    #[test]
    fn frame_snapshots_are_independent_of_later_writes() {
        let ctx = SessionContext::new(Instant::now());
        assert!(ctx.frame_snapshot().is_none());

        ctx.store_frame(RgbImage::new(4, 4));
        let first = ctx.frame_snapshot().unwrap();
        ctx.store_frame(RgbImage::new(8, 8));

        assert_eq!(first.width(), 4);
        assert_eq!(ctx.frame_snapshot().unwrap().width(), 8);
        ctx.clear_frame();
        assert!(ctx.frame_snapshot().is_none());
    }
}
