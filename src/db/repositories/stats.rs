use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{to_u32, to_u64},
    models::DailyStats,
};

impl Database {
    /// Aggregates sessions whose start time falls in `[from, to)`.
    pub async fn daily_stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<DailyStats> {
        self.execute(move |conn| {
            let (from, to) = (from.to_rfc3339(), to.to_rfc3339());

            let (total, count): (i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(elapsed_sec), 0), COUNT(*)
                 FROM sessions
                 WHERE start_time >= ?1 AND start_time < ?2",
                params![from, to],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let top_distraction_topic: Option<String> = conn
                .query_row(
                    "SELECT topic, SUM(distractions) AS total
                     FROM sessions
                     WHERE start_time >= ?1 AND start_time < ?2 AND distractions > 0
                     GROUP BY topic
                     ORDER BY total DESC, topic ASC
                     LIMIT 1",
                    params![from, to],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(DailyStats {
                total_focus_secs: to_u64(total, "elapsed_sec")?,
                session_count: to_u32(count, "session_count")?,
                top_distraction_topic,
            })
        })
        .await
    }
}
