use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::sensing::MonitorTimings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub tick_ms: u64,
    pub presence_poll_ms: u64,
    pub presence_grace_ms: u64,
    pub presence_missing_ms: u64,
    pub presence_cooldown_ms: u64,
    pub presence_min_area_fraction: f32,
    pub capture_retry_ms: u64,
    pub window_poll_ms: u64,
    pub window_cooldown_ms: u64,
    pub gate_cooldown_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        let defaults = MonitorTimings::default();
        Self {
            tick_ms: millis(defaults.tick),
            presence_poll_ms: millis(defaults.presence_poll),
            presence_grace_ms: millis(defaults.presence_grace),
            presence_missing_ms: millis(defaults.presence_missing_threshold),
            presence_cooldown_ms: millis(defaults.presence_cooldown),
            presence_min_area_fraction: defaults.presence_min_area_fraction,
            capture_retry_ms: millis(defaults.capture_retry),
            window_poll_ms: millis(defaults.window_poll),
            window_cooldown_ms: millis(defaults.window_cooldown),
            gate_cooldown_ms: millis(defaults.gate_cooldown),
        }
    }
}

impl TimingSettings {
    pub fn to_timings(&self) -> MonitorTimings {
        MonitorTimings {
            tick: Duration::from_millis(self.tick_ms.max(1)),
            presence_poll: Duration::from_millis(self.presence_poll_ms.max(1)),
            presence_grace: Duration::from_millis(self.presence_grace_ms),
            presence_missing_threshold: Duration::from_millis(self.presence_missing_ms),
            presence_cooldown: Duration::from_millis(self.presence_cooldown_ms),
            presence_min_area_fraction: self.presence_min_area_fraction.clamp(0.0, 1.0),
            capture_retry: Duration::from_millis(self.capture_retry_ms.max(1)),
            window_poll: Duration::from_millis(self.window_poll_ms.max(1)),
            window_cooldown: Duration::from_millis(self.window_cooldown_ms),
            gate_cooldown: Duration::from_millis(self.gate_cooldown_ms),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantSettings {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".into(),
            model: "tinyllama".into(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub timings: TimingSettings,
    /// Grabber argv that writes a single PNG/JPEG frame to stdout.
    pub camera_command: Option<Vec<String>>,
    pub assistant: AssistantSettings,
    /// `None` keeps inactivity out of the distraction decision.
    pub inactivity_timeout_secs: Option<u64>,
    pub default_allow_list: Vec<String>,
}

impl UserSettings {
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        self.inactivity_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> UserSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Application data directory: `$MINDANCHOR_HOME`, else `<data_dir>/mindanchor`.
pub fn app_data_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("MINDANCHOR_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join("mindanchor"))
        .context("no data directory available for this platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.snapshot();
        assert_eq!(settings, UserSettings::default());
        assert_eq!(settings.timings.to_timings(), MonitorTimings::default());
        assert!(settings.inactivity_timeout().is_none());
    }

    #[test]
    fn partial_file_fills_remaining_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"inactivity_timeout_secs": 25, "timings": {"window_poll_ms": 3000}}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).unwrap().snapshot();
        assert_eq!(settings.inactivity_timeout(), Some(Duration::from_secs(25)));
        assert_eq!(settings.timings.window_poll_ms, 3000);
        assert_eq!(settings.timings.presence_poll_ms, 350);
        assert_eq!(settings.assistant.model, "tinyllama");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let settings = SettingsStore::new(path).unwrap().snapshot();
        assert_eq!(settings, UserSettings::default());
    }

    #[test]
    fn update_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update(|s| s.default_allow_list = vec!["code".into(), "pdf".into()])
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap().snapshot();
        assert_eq!(reloaded.default_allow_list, vec!["code", "pdf"]);
    }
}
