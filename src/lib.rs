pub mod assistant;
pub mod console;
pub mod db;
pub mod insights;
pub mod sensing;
pub mod session;
pub mod settings;
pub mod timer;
mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::io::BufReader;

use assistant::Coach;
use console::Console;
use db::Database;
use sensing::Capabilities;
use session::{SessionConfig, SessionController};
use settings::SettingsStore;

pub fn run() -> Result<()> {
    // RUST_LOG wins over the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("MindAnchor starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mindanchor")
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(start());
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

async fn start() -> Result<()> {
    let app_data_dir = settings::app_data_dir()?;
    std::fs::create_dir_all(&app_data_dir)
        .with_context(|| format!("failed to create {}", app_data_dir.display()))?;

    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
    if !settings_store.path().exists() {
        // Write the defaults out once so they can be edited.
        if let Err(err) = settings_store.update(|_| {}) {
            warn!("Could not write default settings: {err:#}");
        }
    }
    let settings = settings_store.snapshot();

    let database = Database::new(app_data_dir.join("mindanchor.sqlite3"))?;

    // Close sessions that were running when the app last crashed.
    match database.recover_unfinished_sessions(Utc::now()).await {
        Ok(ids) if !ids.is_empty() => {
            warn!("Recovered {} interrupted session(s): {:?}", ids.len(), ids)
        }
        Ok(_) => {}
        Err(err) => error!("Failed to recover interrupted sessions: {err:#}"),
    }

    let user_id = match database.latest_user_id().await {
        Ok(id) => id,
        Err(err) => {
            error!("Failed to look up the saved profile: {err:#}");
            None
        }
    };

    let capabilities = Capabilities::detect(&settings).await;
    let coach = Coach::connect(&settings.assistant, Arc::new(database.clone())).await;
    let controller = SessionController::new(
        Arc::new(database),
        capabilities,
        SessionConfig::from_settings(&settings),
    );

    Console::new(
        controller,
        Arc::new(coach),
        settings.default_allow_list.clone(),
        user_id,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
    )
    .run()
    .await
}
