//! Conversational focus coach. A local language model answers when one is
//! reachable; otherwise canned replies do. Callers never see an error.

mod ollama;
mod scripted;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use chrono::Local;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::{timeout_at, Instant};

pub use ollama::OllamaClient;
pub use scripted::ScriptedResponder;

use crate::{
    db::{helpers::local_day_bounds, Database},
    insights,
    settings::AssistantSettings,
};

const ENABLE_LOGS: bool = true;

const NO_STATS: &str = "No session stats are available right now.";

use crate::{log_info, log_warn};

pub trait Assistant: Send + Sync {
    /// Always produces a reply within the configured bound.
    fn respond<'a>(&'a self, user_text: &'a str) -> BoxFuture<'a, String>;
}

/// A chat-completion service.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    fn chat<'a>(&'a self, system: &'a str, user: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Supplies a short description of today's sessions.
pub trait StatsContext: Send + Sync {
    fn stats_context(&self) -> BoxFuture<'_, String>;
}

impl StatsContext for Database {
    fn stats_context(&self) -> BoxFuture<'_, String> {
        async move {
            let stats = match local_day_bounds(Local::now().date_naive()) {
                Ok((from, to)) => self.daily_stats(from, to).await,
                Err(err) => Err(err),
            };
            match stats {
                Ok(stats) => insights::stats_context(&stats),
                Err(err) => {
                    log::error!("Failed to load today's stats: {err:#}");
                    NO_STATS.to_string()
                }
            }
        }
        .boxed()
    }
}

fn system_prompt(stats_context: &str) -> String {
    format!(
        "You are 'Anchor', a friendly and motivating focus coach.\n\
         Keep every answer very short (1-2 sentences).\n\n\
         Here is the user's live data:\n{stats_context}\n\n\
         Use this data to inform your answers naturally."
    )
}

pub struct Coach {
    backend: Option<Arc<dyn ChatBackend>>,
    available: AtomicBool,
    stats: Arc<dyn StatsContext>,
    scripted: ScriptedResponder,
    timeout: Duration,
}

impl Coach {
    pub fn new(
        backend: Option<Arc<dyn ChatBackend>>,
        stats: Arc<dyn StatsContext>,
        timeout: Duration,
    ) -> Self {
        Self {
            available: AtomicBool::new(backend.is_some()),
            backend,
            stats,
            scripted: ScriptedResponder,
            timeout,
        }
    }

    /// Probes the configured model server once. An unreachable server leaves
    /// the coach on scripted replies for the rest of the process.
    pub async fn connect(settings: &AssistantSettings, stats: Arc<dyn StatsContext>) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let backend = match OllamaClient::new(&settings.endpoint, &settings.model, timeout) {
            Ok(client) => match tokio::time::timeout(timeout, client.probe()).await {
                Ok(Ok(())) => {
                    log_info!("assistant using model `{}` at {}", client.model(), settings.endpoint);
                    Some(Arc::new(client) as Arc<dyn ChatBackend>)
                }
                Ok(Err(err)) => {
                    log_warn!("assistant falling back to scripted replies: {err:#}");
                    None
                }
                Err(_) => {
                    log_warn!("assistant probe timed out; using scripted replies");
                    None
                }
            },
            Err(err) => {
                log_warn!("assistant disabled: {err:#}");
                None
            }
        };
        Self::new(backend, stats, timeout)
    }

    pub fn is_model_backed(&self) -> bool {
        self.backend.is_some() && self.available.load(Ordering::Acquire)
    }

    /// The stats lookup and the model call share one deadline.
    async fn answer(&self, user_text: &str) -> String {
        let deadline = Instant::now() + self.timeout;
        let context = match timeout_at(deadline, self.stats.stats_context()).await {
            Ok(context) => context,
            Err(_) => {
                log_warn!("session stats not ready within {:?}", self.timeout);
                NO_STATS.to_string()
            }
        };

        if let Some(backend) = self.backend.as_ref().filter(|_| self.is_model_backed()) {
            let system = system_prompt(&context);
            match timeout_at(deadline, backend.chat(&system, user_text)).await {
                Ok(Ok(reply)) if !reply.is_empty() => return reply,
                Ok(Ok(_)) => log_warn!("{} returned an empty reply", backend.name()),
                Ok(Err(err)) => {
                    log_warn!("{} failed, switching to scripted replies: {err:#}", backend.name());
                    self.available.store(false, Ordering::Release);
                }
                Err(_) => {
                    log_warn!(
                        "{} did not answer within {:?}, switching to scripted replies",
                        backend.name(),
                        self.timeout
                    );
                    self.available.store(false, Ordering::Release);
                }
            }
        }

        self.scripted.respond(user_text, &context)
    }
}

impl Assistant for Coach {
    fn respond<'a>(&'a self, user_text: &'a str) -> BoxFuture<'a, String> {
        self.answer(user_text).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use anyhow::anyhow;

    use super::*;

    struct FixedStats;

    impl StatsContext for FixedStats {
        fn stats_context(&self) -> BoxFuture<'_, String> {
            async { "Total focus time: 50 minutes".to_string() }.boxed()
        }
    }

    struct StuckStats;

    impl StatsContext for StuckStats {
        fn stats_context(&self) -> BoxFuture<'_, String> {
            futures::future::pending().boxed()
        }
    }

    enum Mode {
        Echo,
        Fail,
        Hang,
    }

    struct FakeModel {
        mode: Mode,
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ChatBackend for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        fn chat<'a>(&'a self, system: &'a str, user: &'a str) -> BoxFuture<'a, Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match self.mode {
                    Mode::Echo => Ok(format!("{user} | {}", system.contains("50 minutes"))),
                    Mode::Fail => Err(anyhow!("connection refused")),
                    Mode::Hang => futures::future::pending().await,
                }
            }
            .boxed()
        }
    }

    fn coach(model: Option<Arc<FakeModel>>) -> Coach {
        Coach::new(
            model.map(|model| model as Arc<dyn ChatBackend>),
            Arc::new(FixedStats),
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn model_reply_includes_stats_in_system_prompt() {
        let coach = coach(Some(FakeModel::new(Mode::Echo)));
        assert_eq!(coach.respond("hello").await, "hello | true");
        assert!(coach.is_model_backed());
    }

    #[tokio::test]
    async fn failed_model_falls_back_and_stays_down() {
        let model = FakeModel::new(Mode::Fail);
        let coach = coach(Some(Arc::clone(&model)));

        assert_eq!(coach.respond("stats").await, "Total focus time: 50 minutes");
        assert!(!coach.is_model_backed());
        coach.respond("thanks").await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_is_cut_off() {
        let coach = coach(Some(FakeModel::new(Mode::Hang)));
        let reply = coach.respond("how am i doing").await;
        assert_eq!(reply, "Total focus time: 50 minutes");
        assert!(!coach.is_model_backed());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_stats_do_not_block_replies() {
        let started = Instant::now();
        let scripted = Coach::new(None, Arc::new(StuckStats), Duration::from_secs(20));
        assert_eq!(
            scripted.respond("thank you!").await,
            "You're welcome! Keep up the good work."
        );
        assert!(started.elapsed() <= Duration::from_secs(20));

        let started = Instant::now();
        let backed = Coach::new(
            Some(FakeModel::new(Mode::Hang) as Arc<dyn ChatBackend>),
            Arc::new(StuckStats),
            Duration::from_secs(20),
        );
        backed.respond("hello").await;
        assert!(started.elapsed() <= Duration::from_secs(20));
        assert!(!backed.is_model_backed());
    }

    #[tokio::test]
    async fn without_a_model_scripted_replies_answer() {
        let coach = coach(None);
        assert_eq!(
            coach.respond("thank you!").await,
            "You're welcome! Keep up the good work."
        );
    }
}
