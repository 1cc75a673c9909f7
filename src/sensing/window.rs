use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::{process::Command, sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    controller::MonitorStatus,
    signal::{DistractionReason, DistractionSignal},
    sleep_or_cancel, MonitorTimings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Reads the title of the currently focused window.
pub trait WindowInspector: Send + Sync {
    fn active_title(&self) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Lower-cased keywords; a window title containing any of them is on-task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.0
    }

    pub fn permits(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.0.iter().any(|keyword| title.contains(keyword.as_str()))
    }
}

pub(crate) struct WindowMonitor {
    pub inspector: Arc<dyn WindowInspector>,
    pub allow_list: AllowList,
    pub signals: mpsc::UnboundedSender<DistractionSignal>,
    pub timings: MonitorTimings,
    pub status: Arc<MonitorStatus>,
}

impl WindowMonitor {
    pub(crate) async fn run(self, cancel: CancellationToken) {
        log_info!(
            "window monitor started; allow-list {:?}",
            self.allow_list.keywords()
        );

        loop {
            let title = tokio::select! {
                _ = cancel.cancelled() => break,
                title = self.inspector.active_title() => title,
            };

            match title {
                Ok(Some(title)) if !title.trim().is_empty() => {
                    self.status.observe(Instant::now());
                    if !self.allow_list.permits(&title) {
                        log_info!("active window `{title}` is off the allow-list");
                        if self
                            .signals
                            .send(DistractionSignal::now(DistractionReason::SwitchedApp))
                            .is_err()
                        {
                            break;
                        }
                        if !sleep_or_cancel(&cancel, self.timings.window_cooldown).await {
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => log_debug!("active window lookup failed: {err:#}"),
            }

            if !sleep_or_cancel(&cancel, self.timings.window_poll).await {
                break;
            }
        }

        log_info!("window monitor stopped");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowBackend {
    Hyprland,
    Xdotool,
    AppleScript,
}

/// Active-window lookup through the desktop's own CLI tools.
pub struct CommandWindowInspector {
    backend: WindowBackend,
}

impl CommandWindowInspector {
    /// Picks a backend for this desktop and checks it answers once.
    pub async fn probe() -> Option<Self> {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP")
            .unwrap_or_default()
            .to_lowercase();

        let candidates: &[WindowBackend] = if cfg!(target_os = "macos") {
            &[WindowBackend::AppleScript]
        } else if desktop.contains("hyprland") {
            &[WindowBackend::Hyprland, WindowBackend::Xdotool]
        } else {
            &[WindowBackend::Xdotool]
        };

        for backend in candidates {
            let inspector = Self { backend: *backend };
            match inspector.query().await {
                Ok(_) => {
                    log_info!("window inspector using {:?}", backend);
                    return Some(inspector);
                }
                Err(err) => log_debug!("window backend {:?} unavailable: {err:#}", backend),
            }
        }
        None
    }

    async fn query(&self) -> Result<Option<String>> {
        match self.backend {
            WindowBackend::Hyprland => {
                let stdout = run(Command::new("hyprctl").args(["activewindow", "-j"])).await?;
                let value: Value =
                    serde_json::from_slice(&stdout).context("hyprctl returned invalid JSON")?;
                Ok(value
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string))
            }
            WindowBackend::Xdotool => {
                let stdout =
                    run(Command::new("xdotool").args(["getactivewindow", "getwindowname"])).await?;
                Ok(non_empty(stdout))
            }
            WindowBackend::AppleScript => {
                let script = r#"tell application "System Events"
    set frontApp to first application process whose frontmost is true
    set appName to name of frontApp
    try
        set winName to name of front window of frontApp
    on error
        set winName to ""
    end try
end tell
return appName & " - " & winName"#;
                let stdout = run(Command::new("osascript").args(["-e", script])).await?;
                Ok(non_empty(stdout))
            }
        }
    }
}

impl WindowInspector for CommandWindowInspector {
    fn active_title(&self) -> BoxFuture<'_, Result<Option<String>>> {
        self.query().boxed()
    }
}

async fn run(command: &mut Command) -> Result<Vec<u8>> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to spawn window inspector")?;
    if !output.status.success() {
        bail!(
            "window inspector exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

fn non_empty(stdout: Vec<u8>) -> Option<String> {
    let title = String::from_utf8_lossy(&stdout).trim().to_string();
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_matches_case_insensitive_substrings() {
        let allow = AllowList::new(["Code Editor", " pdf ", ""]);
        assert_eq!(allow.keywords(), ["code editor", "pdf"]);
        assert!(allow.permits("main.rs - CODE EDITOR"));
        assert!(allow.permits("lecture-notes.pdf"));
        assert!(!allow.permits("chat app"));
    }

    #[test]
    fn blank_keywords_leave_list_empty() {
        assert!(AllowList::new(["", "   "]).is_empty());
        assert!(AllowList::default().is_empty());
    }

    #[test]
    fn non_empty_trims_output() {
        assert_eq!(non_empty(b"  Editor \n".to_vec()).as_deref(), Some("Editor"));
        assert_eq!(non_empty(b"\n".to_vec()), None);
    }

    struct Titled(&'static str);

    impl WindowInspector for Titled {
        fn active_title(&self) -> BoxFuture<'_, Result<Option<String>>> {
            async move { Ok(Some(self.0.to_string())) }.boxed()
        }
    }

    fn spawn_monitor(
        title: &'static str,
    ) -> (
        CancellationToken,
        tokio::task::JoinHandle<()>,
        mpsc::UnboundedReceiver<DistractionSignal>,
    ) {
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let monitor = WindowMonitor {
            inspector: Arc::new(Titled(title)),
            allow_list: AllowList::new(["code editor"]),
            signals,
            timings: MonitorTimings::default(),
            status: Arc::new(MonitorStatus::default()),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));
        (cancel, task, signals_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn off_list_window_signals_once_per_cooldown() {
        use std::time::Duration;
        use tokio::time::sleep;

        let (cancel, task, mut signals) = spawn_monitor("chat app");

        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            signals.try_recv().ok().map(|signal| signal.reason),
            Some(DistractionReason::SwitchedApp)
        );

        sleep(Duration::from_secs(5)).await;
        assert!(signals.try_recv().is_err());
        sleep(Duration::from_secs(6)).await;
        assert!(signals.try_recv().is_err());

        // cooldown (5s) plus one poll interval (7s)
        sleep(Duration::from_secs(1)).await;
        assert!(signals.try_recv().is_ok());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn on_list_window_stays_quiet() {
        let (cancel, task, mut signals) = spawn_monitor("notes.md - Code Editor");
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert!(signals.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }
}
