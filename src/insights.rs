//! Post-session summaries and next-session suggestions.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::{DailyStats, SessionRecord};

const MIN_SUGGESTED_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_count: usize,
    pub total_focus_secs: u64,
    pub avg_distractions: f64,
    pub completed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthAdvice {
    Longer,
    Shorter,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSuggestion {
    pub advice: LengthAdvice,
    pub next_length_secs: u64,
    /// Topic with the fewest distractions on average.
    pub best_topic: String,
}

impl PlanSuggestion {
    pub fn describe(&self) -> String {
        let minutes = self.next_length_secs / 60;
        let advice = match self.advice {
            LengthAdvice::Longer => format!(
                "You tend to finish sessions with few distractions. Try about {minutes} minutes next time."
            ),
            LengthAdvice::Shorter => format!(
                "Distractions are piling up. Try shorter sessions (~{minutes} minutes) with frequent breaks."
            ),
            LengthAdvice::Keep => format!(
                "Keep your current length (~{minutes} minutes) and work on consistency."
            ),
        };
        format!(
            "{advice} Schedule your most important block on '{}' and take 5-10 minute breaks between blocks.",
            self.best_topic
        )
    }
}

pub fn summarize(sessions: &[SessionRecord]) -> SessionSummary {
    let total_distractions: u64 = sessions.iter().map(|s| u64::from(s.distractions)).sum();
    SessionSummary {
        session_count: sessions.len(),
        total_focus_secs: sessions.iter().map(|s| s.elapsed_sec).sum(),
        avg_distractions: if sessions.is_empty() {
            0.0
        } else {
            total_distractions as f64 / sessions.len() as f64
        },
        completed_count: sessions.iter().filter(|s| s.completed).count(),
    }
}

/// Recommends the next session length from recent history. `None` without
/// history.
pub fn suggest_plan(sessions: &[SessionRecord]) -> Option<PlanSuggestion> {
    if sessions.is_empty() {
        return None;
    }

    let summary = summarize(sessions);
    let completed_fraction = summary.completed_count as f64 / sessions.len() as f64;
    let avg_secs = summary.total_focus_secs as f64 / sessions.len() as f64;

    let (advice, next_length) = if completed_fraction >= 0.8 && summary.avg_distractions <= 1.0 {
        (LengthAdvice::Longer, avg_secs * 1.1)
    } else if summary.avg_distractions > 2.0 || completed_fraction < 0.6 {
        (
            LengthAdvice::Shorter,
            (avg_secs * 0.8).max(MIN_SUGGESTED_SECS as f64),
        )
    } else {
        (LengthAdvice::Keep, avg_secs)
    };

    let mut per_topic: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for session in sessions {
        let entry = per_topic.entry(session.topic.as_str()).or_default();
        entry.0 += u64::from(session.distractions);
        entry.1 += 1;
    }
    let best_topic = per_topic
        .into_iter()
        .map(|(topic, (distractions, count))| (topic, distractions as f64 / count as f64))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(topic, _)| topic.to_string())
        .unwrap_or_default();

    Some(PlanSuggestion {
        advice,
        next_length_secs: next_length.round() as u64,
        best_topic,
    })
}

/// The context string handed to the assistant.
pub fn stats_context(stats: &DailyStats) -> String {
    if stats.session_count == 0 {
        return "The user has no session data yet for today.".to_string();
    }
    format!(
        "Summary of the user's activity today:\n- Sessions: {}\n- Total focus time: {} minutes\n- Topic with most distractions: {}",
        stats.session_count,
        stats.total_focus_secs / 60,
        stats.top_distraction_topic.as_deref().unwrap_or("none")
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(topic: &str, elapsed_min: u64, distractions: u32, completed: bool) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: 0,
            user_id: Some(1),
            topic: topic.to_string(),
            planned_sec: elapsed_min * 60,
            elapsed_sec: elapsed_min * 60,
            distractions,
            completed,
            start_time: now,
            end_time: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn focused_history_suggests_longer_sessions() {
        let sessions = vec![
            record("math", 25, 0, true),
            record("math", 25, 1, true),
            record("essay", 25, 2, true),
            record("essay", 25, 0, true),
            record("math", 25, 0, false),
        ];
        let plan = suggest_plan(&sessions).unwrap();
        assert_eq!(plan.advice, LengthAdvice::Longer);
        assert_eq!(plan.next_length_secs, 1650);
        assert_eq!(plan.best_topic, "math");
    }

    #[test]
    fn distracted_history_suggests_shorter_with_floor() {
        let sessions = vec![record("history", 5, 4, false), record("history", 5, 3, true)];
        let plan = suggest_plan(&sessions).unwrap();
        assert_eq!(plan.advice, LengthAdvice::Shorter);
        assert_eq!(plan.next_length_secs, 300);
    }

    #[test]
    fn middling_history_keeps_length() {
        let sessions = vec![
            record("art", 30, 2, true),
            record("art", 30, 2, true),
            record("art", 30, 1, false),
        ];
        let plan = suggest_plan(&sessions).unwrap();
        assert_eq!(plan.advice, LengthAdvice::Keep);
        assert_eq!(plan.next_length_secs, 1800);
        assert!(plan.describe().contains("~30 minutes"));
    }

    #[test]
    fn no_history_no_plan() {
        assert!(suggest_plan(&[]).is_none());
        assert_eq!(summarize(&[]).avg_distractions, 0.0);
    }

    #[test]
    fn summary_totals() {
        let summary = summarize(&[record("a", 10, 1, true), record("b", 20, 2, false)]);
        assert_eq!(summary.total_focus_secs, 1800);
        assert_eq!(summary.avg_distractions, 1.5);
        assert_eq!(summary.completed_count, 1);
    }

    #[test]
    fn stats_context_mentions_top_topic() {
        let stats = DailyStats {
            total_focus_secs: 3000,
            session_count: 2,
            top_distraction_topic: Some("chemistry".into()),
        };
        let context = stats_context(&stats);
        assert!(context.contains("50 minutes"));
        assert!(context.contains("chemistry"));
        assert!(stats_context(&DailyStats::default()).contains("no session data"));
    }
}
