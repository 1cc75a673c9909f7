use std::time::Duration;

/// Poll intervals, thresholds and cooldowns shared by every monitor and the
/// arbiter. Process-wide; only the settings file overrides them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorTimings {
    pub tick: Duration,
    pub presence_poll: Duration,
    /// Window at session start in which an initial face is searched for
    /// before the "missing" clock starts.
    pub presence_grace: Duration,
    pub presence_missing_threshold: Duration,
    pub presence_cooldown: Duration,
    /// Regions smaller than this fraction of the frame are ignored.
    pub presence_min_area_fraction: f32,
    pub capture_retry: Duration,
    pub window_poll: Duration,
    pub window_cooldown: Duration,
    pub gate_cooldown: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            presence_poll: Duration::from_millis(350),
            presence_grace: Duration::from_secs(6),
            presence_missing_threshold: Duration::from_secs(4),
            presence_cooldown: Duration::from_secs(6),
            presence_min_area_fraction: 0.01,
            capture_retry: Duration::from_millis(200),
            window_poll: Duration::from_secs(7),
            window_cooldown: Duration::from_secs(5),
            gate_cooldown: Duration::from_secs(6),
        }
    }
}
