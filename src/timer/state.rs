use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_secs: u64 },
    Finished,
    /// Tick after the countdown already hit zero. Nothing changed.
    Idle,
}

/// Remaining-duration counter decremented once per tick.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Countdown {
    total_secs: u64,
    remaining_secs: u64,
}

impl Countdown {
    pub fn new(total_secs: u64) -> Self {
        Self {
            total_secs,
            remaining_secs: total_secs,
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.remaining_secs == 0 {
            return TickOutcome::Idle;
        }
        self.remaining_secs -= 1;
        if self.remaining_secs == 0 {
            TickOutcome::Finished
        } else {
            TickOutcome::Running {
                remaining_secs: self.remaining_secs,
            }
        }
    }

    /// Remaining over total, in [0, 1]. A zero-length countdown reports 0.
    pub fn progress(&self) -> f64 {
        if self.total_secs == 0 {
            return 0.0;
        }
        self.remaining_secs as f64 / self.total_secs as f64
    }

    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.total_secs - self.remaining_secs
    }

    pub fn is_finished(&self) -> bool {
        self.remaining_secs == 0
    }
}
