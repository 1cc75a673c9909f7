use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_u32, to_u64},
    models::SessionRecord,
};

const SESSION_COLUMNS: &str = "id, user_id, topic, planned_sec, elapsed_sec, distractions, completed, start_time, end_time, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let planned_sec: i64 = row.get("planned_sec")?;
    let elapsed_sec: i64 = row.get("elapsed_sec")?;
    let distractions: i64 = row.get("distractions")?;
    let completed: i64 = row.get("completed")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        topic: row.get("topic")?,
        planned_sec: to_u64(planned_sec, "planned_sec")?,
        elapsed_sec: to_u64(elapsed_sec, "elapsed_sec")?,
        distractions: to_u32(distractions, "distractions")?,
        completed: completed != 0,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn expect_one_row(rows_affected: usize, session_id: i64) -> Result<()> {
    if rows_affected == 0 {
        return Err(anyhow!("session {session_id} not found"));
    }
    Ok(())
}

impl Database {
    /// Inserts a running session with zero elapsed time and returns its id.
    /// Sessions without a saved profile carry a NULL user.
    pub async fn insert_session(
        &self,
        user_id: Option<i64>,
        topic: &str,
        planned_sec: u64,
        start_time: DateTime<Utc>,
    ) -> Result<i64> {
        let topic = topic.to_string();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (user_id, topic, planned_sec, elapsed_sec, distractions, completed, start_time, end_time, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, 0, 0, ?4, NULL, ?5, ?5)",
                params![
                    user_id,
                    topic,
                    to_i64(planned_sec)?,
                    start_time.to_rfc3339(),
                    now,
                ],
            )
            .context("failed to insert session")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn set_session_distractions(&self, session_id: i64, count: u32) -> Result<()> {
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE sessions SET distractions = ?1, updated_at = ?2 WHERE id = ?3",
                params![count, Utc::now().to_rfc3339(), session_id],
            )?;
            expect_one_row(rows, session_id)
        })
        .await
    }

    pub async fn update_session_progress(&self, session_id: i64, elapsed_sec: u64) -> Result<()> {
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE sessions SET elapsed_sec = ?1, updated_at = ?2
                 WHERE id = ?3 AND end_time IS NULL",
                params![to_i64(elapsed_sec)?, Utc::now().to_rfc3339(), session_id],
            )?;
            if rows == 0 {
                log::debug!("progress update skipped for session {session_id}: finished or missing");
            }
            Ok(())
        })
        .await
    }

    pub async fn mark_session_finished(
        &self,
        session_id: i64,
        elapsed_sec: u64,
        completed: bool,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE sessions
                 SET elapsed_sec = ?1,
                     completed = ?2,
                     end_time = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    to_i64(elapsed_sec)?,
                    completed as i64,
                    end_time.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    session_id,
                ],
            )?;
            expect_one_row(rows, session_id)
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<SessionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recent sessions for a user (or for no user), newest first.
    pub async fn list_recent_sessions(
        &self,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id IS ?1
                 ORDER BY id DESC
                 LIMIT ?2"
            ))?;
            let mut rows = stmt.query(params![user_id, limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Closes sessions left open by a crash. Their elapsed time stays at the
    /// last heartbeat and they are never counted as completed.
    pub async fn recover_unfinished_sessions(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare("SELECT id FROM sessions WHERE end_time IS NULL")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            let stamp = now.to_rfc3339();
            for id in &ids {
                tx.execute(
                    "UPDATE sessions SET completed = 0, end_time = ?1, updated_at = ?1 WHERE id = ?2",
                    params![stamp, id],
                )?;
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    pub async fn latest_user_id(&self) -> Result<Option<i64>> {
        self.execute(|conn| {
            conn.query_row("SELECT id FROM users ORDER BY id DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(Into::into)
        })
        .await
    }
}
