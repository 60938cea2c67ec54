// src/pipeline/watch.rs

//! Live watching across every configured venue.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::WatcherConfig;
use crate::services::{FetchOrchestrator, LiveRaceWatcher};
use crate::storage::RaceStore;

/// Spawn one watcher per venue and wait until all of them have stopped.
///
/// Watchers run until `cancel` fires; a panicking watcher is logged and
/// does not take the others down.
pub async fn run_watchers(
    config: &WatcherConfig,
    orchestrator: Arc<FetchOrchestrator>,
    store: Arc<dyn RaceStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for venue in orchestrator.registry().iter() {
        let watcher = LiveRaceWatcher::new(
            venue.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&store),
            config.clone(),
        );
        tasks.spawn(watcher.run(cancel.clone()));
    }
    log::info!("Watching {} venues", tasks.len());

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            log::error!("Watcher task failed: {}", e);
        }
    }

    log::info!("All watchers stopped");
    Ok(())
}
