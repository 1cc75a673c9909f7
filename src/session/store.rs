use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::{Database, SessionRecord, UserProfile};

/// The record store as seen by the session core.
///
/// Every write is best-effort from the session's point of view: the driver
/// logs failures and keeps running.
pub trait SessionStore: Send + Sync + 'static {
    fn create_user(&self, profile: &UserProfile) -> impl Future<Output = Result<i64>> + Send;

    fn create_session(
        &self,
        user_id: Option<i64>,
        topic: &str,
        planned_sec: u64,
    ) -> impl Future<Output = Result<i64>> + Send;

    fn update_session_distractions(
        &self,
        session_id: i64,
        count: u32,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Heartbeat of elapsed seconds for a running session.
    fn update_session_progress(
        &self,
        session_id: i64,
        elapsed_sec: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn finalize_session(
        &self,
        session_id: i64,
        elapsed_sec: u64,
        completed: bool,
        end_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Newest first.
    fn list_recent_sessions(
        &self,
        user_id: Option<i64>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SessionRecord>>> + Send;
}

impl SessionStore for Database {
    async fn create_user(&self, profile: &UserProfile) -> Result<i64> {
        self.insert_user(profile).await
    }

    async fn create_session(
        &self,
        user_id: Option<i64>,
        topic: &str,
        planned_sec: u64,
    ) -> Result<i64> {
        self.insert_session(user_id, topic, planned_sec, Utc::now())
            .await
    }

    async fn update_session_distractions(&self, session_id: i64, count: u32) -> Result<()> {
        self.set_session_distractions(session_id, count).await
    }

    async fn update_session_progress(&self, session_id: i64, elapsed_sec: u64) -> Result<()> {
        Database::update_session_progress(self, session_id, elapsed_sec).await
    }

    async fn finalize_session(
        &self,
        session_id: i64,
        elapsed_sec: u64,
        completed: bool,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        self.mark_session_finished(session_id, elapsed_sec, completed, end_time)
            .await
    }

    async fn list_recent_sessions(
        &self,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        Database::list_recent_sessions(self, user_id, limit).await
    }
}
