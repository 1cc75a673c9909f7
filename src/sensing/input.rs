use std::sync::Arc;

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{context::SessionContext, controller::MonitorStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub type ActivityCallback = Arc<dyn Fn() + Send + Sync>;

/// Global keyboard/pointer hook.
pub trait InputHook: Send + Sync {
    fn subscribe(&self, on_activity: ActivityCallback) -> Result<Box<dyn InputSubscription>>;
}

pub trait InputSubscription: Send {
    fn unsubscribe(self: Box<Self>);
}

pub(crate) struct InputMonitor {
    pub hook: Arc<dyn InputHook>,
    pub ctx: Arc<SessionContext>,
    pub status: Arc<MonitorStatus>,
}

impl InputMonitor {
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let ctx = Arc::clone(&self.ctx);
        let status = Arc::clone(&self.status);
        let callback: ActivityCallback = Arc::new(move || {
            let now = Instant::now();
            ctx.mark_activity(now);
            status.observe(now);
        });

        let subscription = match self.hook.subscribe(callback) {
            Ok(subscription) => subscription,
            Err(err) => {
                log_warn!("input activity unavailable for this session: {err:#}");
                return;
            }
        };

        self.ctx.set_input_available(true);
        log_info!("input activity monitor subscribed");

        cancel.cancelled().await;

        subscription.unsubscribe();
        self.ctx.set_input_available(false);
        log_info!("input activity monitor unsubscribed");
    }
}

#[cfg(feature = "input-hook")]
pub use rdev_hook::RdevInputHook;

#[cfg(feature = "input-hook")]
mod rdev_hook {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc, Mutex, OnceLock,
        },
        thread,
    };

    use anyhow::{bail, Context, Result};

    use super::{ActivityCallback, InputHook, InputSubscription};

    /// `rdev::listen` never returns while it works, so one listener thread
    /// serves the whole process and sessions attach to it.
    struct Registry {
        next_id: AtomicU64,
        subscribers: Mutex<HashMap<u64, ActivityCallback>>,
        failed: AtomicBool,
    }

    impl Registry {
        fn notify(&self) {
            let callbacks: Vec<ActivityCallback> = match self.subscribers.lock() {
                Ok(guard) => guard.values().cloned().collect(),
                Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
            };
            for callback in callbacks {
                callback();
            }
        }
    }

    static REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

    fn registry() -> Result<Arc<Registry>> {
        if let Some(registry) = REGISTRY.get() {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(Registry {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            failed: AtomicBool::new(false),
        });
        if REGISTRY.set(Arc::clone(&registry)).is_err() {
            return REGISTRY
                .get()
                .cloned()
                .context("input registry initialisation raced");
        }

        let listener = Arc::clone(&registry);
        thread::Builder::new()
            .name("mindanchor-input".into())
            .spawn(move || {
                let events = Arc::clone(&listener);
                if let Err(err) = rdev::listen(move |_event| events.notify()) {
                    log::warn!("global input hook stopped: {err:?}");
                    listener.failed.store(true, Ordering::Release);
                }
            })
            .context("failed to spawn input listener thread")?;

        Ok(registry)
    }

    pub struct RdevInputHook;

    impl RdevInputHook {
        pub fn probe() -> Option<Self> {
            match registry() {
                Ok(registry) if !registry.failed.load(Ordering::Acquire) => Some(Self),
                Ok(_) => None,
                Err(err) => {
                    log::warn!("global input hook unavailable: {err:#}");
                    None
                }
            }
        }
    }

    impl InputHook for RdevInputHook {
        fn subscribe(&self, on_activity: ActivityCallback) -> Result<Box<dyn InputSubscription>> {
            let registry = registry()?;
            if registry.failed.load(Ordering::Acquire) {
                bail!("global input hook is not running");
            }
            let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
            match registry.subscribers.lock() {
                Ok(mut guard) => guard.insert(id, on_activity),
                Err(poisoned) => poisoned.into_inner().insert(id, on_activity),
            };
            Ok(Box::new(RdevSubscription { id, registry }))
        }
    }

    struct RdevSubscription {
        id: u64,
        registry: Arc<Registry>,
    }

    impl InputSubscription for RdevSubscription {
        fn unsubscribe(self: Box<Self>) {
            match self.registry.subscribers.lock() {
                Ok(mut guard) => guard.remove(&self.id),
                Err(poisoned) => poisoned.into_inner().remove(&self.id),
            };
        }
    }
}
