//! Persisted focus-session rows and the aggregates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub topic: String,
    pub planned_sec: u64,
    pub elapsed_sec: u64,
    pub distractions: u32,
    pub completed: bool,
    pub start_time: DateTime<Utc>,
    /// `None` while the session is running (or if the process died mid-session).
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Totals for one local calendar day, used as assistant context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub total_focus_secs: u64,
    pub session_count: u32,
    pub top_distraction_topic: Option<String>,
}
