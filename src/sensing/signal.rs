use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistractionReason {
    NoPresence,
    SwitchedApp,
    Inactivity,
}

impl DistractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistractionReason::NoPresence => "no_presence",
            DistractionReason::SwitchedApp => "switched_app",
            DistractionReason::Inactivity => "inactivity",
        }
    }
}

impl std::fmt::Display for DistractionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posted by a monitor task; consumed by the session driver on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistractionSignal {
    pub reason: DistractionReason,
    pub raised_at: Instant,
}

impl DistractionSignal {
    pub fn now(reason: DistractionReason) -> Self {
        Self {
            reason,
            raised_at: Instant::now(),
        }
    }
}
