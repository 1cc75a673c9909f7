use std::sync::Arc;

use chrono::{Local, Utc};
use mindanchor_lib::{
    db::{helpers::local_day_bounds, Database, UserProfile},
    sensing::Capabilities,
    session::{SessionConfig, SessionController, SessionRequest, SessionStore},
};
use tempfile::TempDir;

fn open_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("mindanchor.sqlite3")).unwrap();
    (dir, db)
}

fn profile(name: &str) -> UserProfile {
    UserProfile {
        name: name.to_string(),
        country: Some("NZ".to_string()),
        age: Some(21),
        gender: None,
        interest: Some("maths".to_string()),
    }
}

#[tokio::test]
async fn users_round_trip() {
    let (_dir, db) = open_database();
    assert_eq!(db.latest_user_id().await.unwrap(), None);

    let id = db.create_user(&profile("Ari")).await.unwrap();
    let user = db.get_user(id).await.unwrap().unwrap();
    assert_eq!(user.profile, profile("Ari"));
    assert_eq!(db.latest_user_id().await.unwrap(), Some(id));
    assert!(db.get_user(id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn session_rows_follow_the_lifecycle() {
    let (_dir, db) = open_database();
    let user_id = db.create_user(&profile("Ari")).await.unwrap();

    let id = db.create_session(Some(user_id), "calculus", 1500).await.unwrap();
    let fresh = db.get_session(id).await.unwrap().unwrap();
    assert_eq!(fresh.elapsed_sec, 0);
    assert_eq!(fresh.distractions, 0);
    assert!(!fresh.completed);
    assert!(!fresh.is_finished());

    db.update_session_distractions(id, 2).await.unwrap();
    SessionStore::update_session_progress(&db, id, 600).await.unwrap();
    let running = db.get_session(id).await.unwrap().unwrap();
    assert_eq!(running.distractions, 2);
    assert_eq!(running.elapsed_sec, 600);

    let ended = Utc::now();
    db.finalize_session(id, 1500, true, ended).await.unwrap();
    let done = db.get_session(id).await.unwrap().unwrap();
    assert!(done.completed);
    assert_eq!(done.elapsed_sec, 1500);
    assert_eq!(done.end_time.map(|t| t.timestamp()), Some(ended.timestamp()));

    // heartbeats after the end are ignored
    SessionStore::update_session_progress(&db, id, 10).await.unwrap();
    assert_eq!(db.get_session(id).await.unwrap().unwrap().elapsed_sec, 1500);

    assert!(db.finalize_session(id + 100, 1, false, ended).await.is_err());
}

#[tokio::test]
async fn recent_sessions_are_newest_first() {
    let (_dir, db) = open_database();
    let me = db.create_user(&profile("Ari")).await.unwrap();
    let other = db.create_user(&profile("Bo")).await.unwrap();

    for topic in ["one", "two", "three"] {
        db.create_session(Some(me), topic, 60).await.unwrap();
    }
    db.create_session(Some(other), "elsewhere", 60).await.unwrap();

    let recent = db.list_recent_sessions(Some(me), 2).await.unwrap();
    let topics: Vec<&str> = recent.iter().map(|s| s.topic.as_str()).collect();
    assert_eq!(topics, ["three", "two"]);
}

#[tokio::test]
async fn sessions_without_a_profile_are_kept() {
    let (_dir, db) = open_database();
    let me = db.create_user(&profile("Ari")).await.unwrap();
    db.create_session(Some(me), "linked", 60).await.unwrap();
    let id = db.create_session(None, "anonymous", 60).await.unwrap();

    let record = db.get_session(id).await.unwrap().unwrap();
    assert_eq!(record.user_id, None);

    let recent = db.list_recent_sessions(None, 10).await.unwrap();
    let topics: Vec<&str> = recent.iter().map(|s| s.topic.as_str()).collect();
    assert_eq!(topics, ["anonymous"]);
}

#[tokio::test]
async fn interrupted_sessions_are_closed_on_recovery() {
    let (_dir, db) = open_database();
    let user_id = db.create_user(&profile("Ari")).await.unwrap();

    let finished = db.create_session(Some(user_id), "done", 60).await.unwrap();
    db.finalize_session(finished, 60, true, Utc::now()).await.unwrap();
    let crashed = db.create_session(Some(user_id), "crashed", 1500).await.unwrap();
    SessionStore::update_session_progress(&db, crashed, 120)
        .await
        .unwrap();

    assert_eq!(
        db.recover_unfinished_sessions(Utc::now()).await.unwrap(),
        vec![crashed]
    );
    let record = db.get_session(crashed).await.unwrap().unwrap();
    assert!(record.is_finished());
    assert!(!record.completed);
    assert_eq!(record.elapsed_sec, 120);
    assert!(db.get_session(finished).await.unwrap().unwrap().completed);

    assert!(db
        .recover_unfinished_sessions(Utc::now())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn daily_stats_cover_today() {
    let (_dir, db) = open_database();
    let user_id = db.create_user(&profile("Ari")).await.unwrap();

    for (topic, elapsed, distractions) in [("physics", 600, 1), ("history", 900, 4), ("physics", 300, 2)] {
        let id = db.create_session(Some(user_id), topic, elapsed).await.unwrap();
        db.update_session_distractions(id, distractions).await.unwrap();
        db.finalize_session(id, elapsed, true, Utc::now()).await.unwrap();
    }

    let (from, to) = local_day_bounds(Local::now().date_naive()).unwrap();
    let stats = db.daily_stats(from, to).await.unwrap();
    assert_eq!(stats.session_count, 3);
    assert_eq!(stats.total_focus_secs, 1800);
    assert_eq!(stats.top_distraction_topic.as_deref(), Some("history"));
}

#[tokio::test]
async fn ending_early_persists_the_override() {
    let (_dir, db) = open_database();
    let user_id = db.create_user(&profile("Ari")).await.unwrap();
    let controller = SessionController::new(
        Arc::new(db.clone()),
        Capabilities::none(),
        SessionConfig::default(),
    );

    let handle = controller
        .start(SessionRequest::new(user_id, "geometry", 1500))
        .await
        .unwrap();
    let outcome = handle.end_early(Some(3)).await.unwrap();
    let id = outcome.session_id.unwrap();

    let record = db.get_session(id).await.unwrap().unwrap();
    assert!(!record.completed);
    assert_eq!(record.distractions, 3);
    assert!(record.end_time.is_some());
    assert_eq!(record.planned_sec, 1500);
}
