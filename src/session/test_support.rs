//! In-memory collaborators for driving sessions under paused time.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use image::RgbImage;
use tokio::time::Instant;

use super::SessionStore;
use crate::{
    db::{SessionRecord, UserProfile},
    sensing::{
        camera::{CaptureDevice, Frame, FrameSource},
        face::{PresenceDetector, Region},
        input::{ActivityCallback, InputHook, InputSubscription},
        preview::PreviewSurface,
        window::WindowInspector,
        Capabilities,
    },
};

#[derive(Default)]
pub(crate) struct MemoryStore {
    sessions: Mutex<Vec<SessionRecord>>,
    users: Mutex<Vec<UserProfile>>,
    pub finalize_calls: AtomicUsize,
    pub distraction_writes: AtomicUsize,
    pub progress_writes: AtomicUsize,
    pub failing: AtomicBool,
    pub reject_users: AtomicBool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub fn session(&self, id: i64) -> Option<SessionRecord> {
        self.lock()
            .iter()
            .find(|session| session.id == id)
            .cloned()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionRecord>> {
        self.sessions.lock().unwrap()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        Ok(())
    }

    fn with_session(&self, id: i64, apply: impl FnOnce(&mut SessionRecord)) -> Result<()> {
        self.check()?;
        let mut sessions = self.lock();
        let session = sessions
            .iter_mut()
            .find(|session| session.id == id)
            .ok_or_else(|| anyhow!("session {id} not found"))?;
        apply(session);
        session.updated_at = Utc::now();
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    async fn create_user(&self, profile: &UserProfile) -> Result<i64> {
        self.check()?;
        if self.reject_users.load(Ordering::SeqCst) {
            bail!("users table is read-only");
        }
        let mut users = self.users.lock().unwrap();
        users.push(profile.clone());
        Ok(users.len() as i64)
    }

    async fn create_session(
        &self,
        user_id: Option<i64>,
        topic: &str,
        planned_sec: u64,
    ) -> Result<i64> {
        self.check()?;
        let mut sessions = self.lock();
        let id = sessions.len() as i64 + 1;
        let now = Utc::now();
        sessions.push(SessionRecord {
            id,
            user_id,
            topic: topic.to_string(),
            planned_sec,
            elapsed_sec: 0,
            distractions: 0,
            completed: false,
            start_time: now,
            end_time: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_session_distractions(&self, session_id: i64, count: u32) -> Result<()> {
        self.distraction_writes.fetch_add(1, Ordering::SeqCst);
        self.with_session(session_id, |session| session.distractions = count)
    }

    async fn update_session_progress(&self, session_id: i64, elapsed_sec: u64) -> Result<()> {
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        self.with_session(session_id, |session| session.elapsed_sec = elapsed_sec)
    }

    async fn finalize_session(
        &self,
        session_id: i64,
        elapsed_sec: u64,
        completed: bool,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.with_session(session_id, |session| {
            session.elapsed_sec = elapsed_sec;
            session.completed = completed;
            session.end_time = Some(end_time);
        })
    }

    async fn list_recent_sessions(
        &self,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        self.check()?;
        Ok(self
            .lock()
            .iter()
            .rev()
            .filter(|session| session.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Camera whose frames are blank images. Tracks whether it is held open.
#[derive(Default)]
pub(crate) struct FakeCamera {
    pub open: Arc<AtomicBool>,
    pub opened: AtomicUsize,
    pub refuse_open: bool,
    pub fail_reads: bool,
}

struct FakeSource {
    open: Arc<AtomicBool>,
    fail_reads: bool,
}

impl CaptureDevice for FakeCamera {
    fn name(&self) -> &str {
        "fake camera"
    }

    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>>> {
        async move {
            if self.refuse_open {
                bail!("device busy");
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.open.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeSource {
                open: Arc::clone(&self.open),
                fail_reads: self.fail_reads,
            }) as Box<dyn FrameSource>)
        }
        .boxed()
    }
}

impl FrameSource for FakeSource {
    fn capture(&mut self) -> BoxFuture<'_, Result<Frame>> {
        let result = if self.fail_reads {
            Err(anyhow!("read timed out"))
        } else {
            Ok(RgbImage::new(64, 48))
        };
        async move { result }.boxed()
    }

    fn release(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Finds a large face except inside `[absent_from, absent_until)` measured
/// from construction.
pub(crate) struct ScriptedDetector {
    start: Instant,
    absent_from: Duration,
    absent_until: Duration,
}

impl ScriptedDetector {
    pub fn always_present() -> Self {
        Self::absent_between(Duration::MAX, Duration::MAX)
    }

    pub fn never_present() -> Self {
        Self::absent_between(Duration::ZERO, Duration::MAX)
    }

    pub fn absent_between(from: Duration, until: Duration) -> Self {
        Self {
            start: Instant::now(),
            absent_from: from,
            absent_until: until,
        }
    }
}

impl PresenceDetector for ScriptedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Region>> {
        let offset = Instant::now().saturating_duration_since(self.start);
        if offset >= self.absent_from && offset < self.absent_until {
            return Ok(Vec::new());
        }
        Ok(vec![Region {
            x: 16,
            y: 8,
            width: 32,
            height: 32,
        }])
    }
}

pub(crate) struct FixedWindow(pub &'static str);

impl WindowInspector for FixedWindow {
    fn active_title(&self) -> BoxFuture<'_, Result<Option<String>>> {
        async move { Ok(Some(self.0.to_string())) }.boxed()
    }
}

#[derive(Default)]
pub(crate) struct FakeInputHook {
    pub subscribed: Arc<AtomicBool>,
    callback: Mutex<Option<ActivityCallback>>,
}

impl FakeInputHook {
    /// Simulates a key press.
    pub fn press(&self) {
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback();
        }
    }
}

struct FakeSubscription(Arc<AtomicBool>);

impl InputHook for FakeInputHook {
    fn subscribe(&self, on_activity: ActivityCallback) -> Result<Box<dyn InputSubscription>> {
        *self.callback.lock().unwrap() = Some(on_activity);
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeSubscription(Arc::clone(&self.subscribed))))
    }
}

impl InputSubscription for FakeSubscription {
    fn unsubscribe(self: Box<Self>) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct FakePreview(pub Arc<AtomicBool>);

impl PreviewSurface for FakePreview {
    fn close(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn capabilities_with(
    camera: Option<Arc<FakeCamera>>,
    detector: ScriptedDetector,
    input: Option<Arc<FakeInputHook>>,
    window: Option<FixedWindow>,
) -> Capabilities {
    Capabilities {
        camera: camera.map(|camera| camera as Arc<dyn CaptureDevice>),
        detector: Arc::new(detector),
        input: input.map(|hook| hook as Arc<dyn InputHook>),
        window: window.map(|window| Arc::new(window) as Arc<dyn WindowInspector>),
    }
}
