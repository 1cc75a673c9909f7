use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use super::migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// The thread that owns the connection. Closing the job queue stops it.
struct Worker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take() {
            if let Err(err) = thread.join() {
                error!("Database worker panicked: {err:?}");
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;

    // WAL is a nicety; foreign keys guard the users/sessions link.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Could not enable WAL journal: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.blocking_recv() {
        job(&mut conn);
    }
    debug!("database worker stopped");
}

/// Handle to the SQLite record store.
///
/// The connection is opened and migrated on the calling thread, then moved to
/// a dedicated worker. Statements run there one at a time, in submission
/// order. Clones share the worker; it stops once the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let conn = open_connection(&db_path)?;
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
        let thread = thread::Builder::new()
            .name("mindanchor-db".into())
            .spawn(move || serve(conn, jobs_rx))
            .context("failed to spawn database worker thread")?;

        info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs_tx),
                thread: Some(thread),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the worker and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .worker
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database worker already stopped"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have given up waiting.
            let _ = reply_tx.send(task(conn));
        });
        jobs.send(job)
            .map_err(|_| anyhow!("database worker is not accepting jobs"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }
}
