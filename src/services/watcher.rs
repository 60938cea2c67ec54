// src/services/watcher.rs

//! Live scoreboard watcher.
//!
//! One watcher per venue long-polls the vendor's scoreboard hub. When a
//! message reports that the current heat has stopped running, the watcher
//! fetches that heat's detail page, registers the entrants, and persists the
//! heat with every entrant's session in one store call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{FullSessionRecord, HeatId, HistoryEntry, RacerId, Venue, WatcherConfig};
use crate::services::fetch::FetchOrchestrator;
use crate::storage::{HeatRow, RaceStore, RacerProfile, SessionRow};

/// Where the watcher is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Polling,
    Reconciling,
    Persisting,
    ErrorBackoff,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Polling => "polling",
            Self::Reconciling => "reconciling",
            Self::Persisting => "persisting",
            Self::ErrorBackoff => "error backoff",
        };
        f.write_str(name)
    }
}

/// Long-poll subscription state echoed back to the hub on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCursor {
    pub client_id: Uuid,
    pub subscription_group: String,
    pub message_id: String,
}

impl PollCursor {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            subscription_group: config.subscription_group.clone(),
            message_id: config.initial_message_id.clone(),
        }
    }

    pub fn form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("clientId", self.client_id.to_string()),
            ("groups", self.subscription_group.clone()),
            ("messageId", self.message_id.clone()),
        ]
    }
}

/// Body of one long-poll response.
#[derive(Debug, Deserialize)]
pub struct PollResponse {
    #[serde(rename = "MessageId", default, deserialize_with = "lenient_string")]
    pub message_id: Option<String>,

    #[serde(rename = "Messages", default)]
    pub messages: Vec<HubMessage>,
}

#[derive(Debug, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "Args", default)]
    pub args: Vec<serde_json::Value>,
}

/// Scoreboard snapshot carried as the first argument of a hub message.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardUpdate {
    #[serde(rename = "RaceRunning", default)]
    pub race_running: Option<bool>,

    #[serde(rename = "ScoreboardData", default)]
    pub scoreboard: Vec<ScoreboardEntry>,
}

impl ScoreboardUpdate {
    /// A missing flag counts as still running.
    pub fn is_running(&self) -> bool {
        self.race_running.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreboardEntry {
    #[serde(rename = "CustID", deserialize_with = "lenient_u64")]
    pub racer_id: RacerId,

    #[serde(rename = "HeatNo", deserialize_with = "lenient_u64")]
    pub heat_no: HeatId,

    #[serde(rename = "RacerName", default)]
    pub racer_name: String,

    #[serde(rename = "AutoNo", deserialize_with = "lenient_u64")]
    pub kart: u64,
}

impl PollResponse {
    /// Scoreboard updates in message order; messages of other shapes are skipped.
    ///
    /// A message that carries scoreboard data but does not decode is logged
    /// as a warning, since it may hold a finished-heat signal.
    pub fn updates(&self, venue: &str) -> Vec<ScoreboardUpdate> {
        self.messages
            .iter()
            .filter_map(|message| message.args.first())
            .filter_map(|arg| match ScoreboardUpdate::deserialize(arg) {
                Ok(update) => Some(update),
                Err(e) if is_scoreboard_shaped(arg) => {
                    log::warn!("{}: dropping malformed scoreboard message: {}", venue, e);
                    None
                }
                Err(e) => {
                    log::debug!("{}: skipping hub message: {}", venue, e);
                    None
                }
            })
            .collect()
    }
}

fn is_scoreboard_shaped(arg: &serde_json::Value) -> bool {
    arg.get("ScoreboardData").is_some() || arg.get("RaceRunning").is_some()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    }))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    use serde::de::Error;

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.trim().parse().map_err(D::Error::custom),
        StringOrNumber::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("expected unsigned integer, got {n}"))),
    }
}

/// Long-poll loop for one venue.
pub struct LiveRaceWatcher {
    venue: Venue,
    orchestrator: Arc<FetchOrchestrator>,
    store: Arc<dyn RaceStore>,
    config: WatcherConfig,
    url: String,
    cursor: PollCursor,
    last_committed: Option<HeatId>,
    phase: WatchPhase,
}

impl LiveRaceWatcher {
    pub fn new(
        venue: Venue,
        orchestrator: Arc<FetchOrchestrator>,
        store: Arc<dyn RaceStore>,
        config: WatcherConfig,
    ) -> Self {
        let url = orchestrator.live_feed_url(&venue);
        let cursor = PollCursor::new(&config);
        Self {
            venue,
            orchestrator,
            store,
            config,
            url,
            cursor,
            last_committed: None,
            phase: WatchPhase::Polling,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    /// Most recent heat persisted (or deliberately passed over).
    pub fn last_committed(&self) -> Option<HeatId> {
        self.last_committed
    }

    fn enter(&mut self, phase: WatchPhase) {
        if self.phase != phase {
            log::debug!("{} watcher: {} -> {}", self.venue.name, self.phase, phase);
            self.phase = phase;
        }
    }

    /// Run until `cancel` fires. Cancellation is honored while waiting on the
    /// hub or sleeping, never in the middle of a store write.
    pub async fn run(mut self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        log::info!("Started {} live data fetcher", self.venue.name);

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll() => polled,
            };

            match polled {
                Ok(updates) => {
                    self.process(updates).await;
                    if self.phase != WatchPhase::ErrorBackoff {
                        self.enter(WatchPhase::Polling);
                    }
                }
                Err(e) => {
                    self.enter(WatchPhase::ErrorBackoff);
                    log::error!("Error watching for {} data: {}", self.venue.name, e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        log::info!("Stopped {} live data fetcher", self.venue.name);
    }

    /// Issue one long-poll request and advance the cursor.
    pub async fn poll(&mut self) -> Result<Vec<ScoreboardUpdate>> {
        self.enter(WatchPhase::Polling);

        let form = self.cursor.form();
        let response = self
            .orchestrator
            .transport()
            .post_form(&self.url, &form)
            .await?;
        if !response.is_success() {
            return Err(AppError::Status {
                url: self.url.clone(),
                status: response.status,
            });
        }

        let body: PollResponse = serde_json::from_str(&response.body)?;
        if let Some(message_id) = &body.message_id {
            self.cursor.message_id = message_id.clone();
        }
        Ok(body.updates(&self.venue.name))
    }

    /// Walk one batch of updates in order, committing each finished heat
    /// once. Returns the number of heats persisted.
    pub async fn process(&mut self, updates: Vec<ScoreboardUpdate>) -> usize {
        let mut current: Option<(HeatId, Vec<ScoreboardEntry>)> = None;
        let mut attempted: Option<HeatId> = None;
        let mut persisted = 0;

        for update in updates {
            if let Some(first) = update.scoreboard.first() {
                current = Some((first.heat_no, update.scoreboard.clone()));
            }
            let Some((heat_no, entrants)) = &current else { continue };
            let heat_no = *heat_no;

            if update.is_running()
                || Some(heat_no) == self.last_committed
                || Some(heat_no) == attempted
            {
                continue;
            }
            attempted = Some(heat_no);

            match self.commit_heat(heat_no, entrants).await {
                Ok(true) => persisted += 1,
                Ok(false) => {}
                Err(e) => {
                    self.enter(WatchPhase::ErrorBackoff);
                    log::error!(
                        "Failed to save {} heat {}: {}",
                        self.venue.name,
                        heat_no,
                        e
                    );
                }
            }
        }
        persisted
    }

    /// Reconcile the entrants of a finished heat with its detail page and
    /// persist the result. `Ok(false)` means nothing was written.
    async fn commit_heat(&mut self, heat_no: HeatId, entrants: &[ScoreboardEntry]) -> Result<bool> {
        self.enter(WatchPhase::Reconciling);

        let mut heats = self
            .orchestrator
            .get_heat_info(&self.venue, &[heat_no])
            .await;
        let Some(heat) = heats.remove(&heat_no) else {
            log::warn!(
                "No details yet for {} heat {}; retrying next cycle",
                self.venue.name,
                heat_no
            );
            return Ok(false);
        };
        log::debug!("Got data for {} heat at {}", self.venue.name, heat.start_time);

        let mut sessions = Vec::with_capacity(entrants.len());
        for entrant in entrants {
            self.store
                .add_racer(&RacerProfile::new(entrant.racer_id, entrant.racer_name.clone()))
                .await?;

            let Ok(kart) = u32::try_from(entrant.kart) else {
                log::warn!("Kart number {} out of range for racer {}", entrant.kart, entrant.racer_id);
                continue;
            };
            let entry = HistoryEntry {
                venue: self.venue.name.clone(),
                heat_id: heat_no,
                kart,
                time: heat.start_time,
            };
            match FullSessionRecord::join(entrant.racer_id, &entry, &heat) {
                Some(record) => sessions.push(SessionRow::from(&record)),
                None => log::warn!(
                    "{} heat {} has no session for racer {}",
                    self.venue.name,
                    heat_no,
                    entrant.racer_id
                ),
            }
        }

        if sessions.is_empty() {
            log::warn!(
                "{} heat {} finished with no reconcilable sessions",
                self.venue.name,
                heat_no
            );
            self.last_committed = Some(heat_no);
            return Ok(false);
        }

        self.enter(WatchPhase::Persisting);
        self.store
            .record_heat(&HeatRow::from_heat(self.venue.name.clone(), &heat), &sessions)
            .await?;

        self.last_committed = Some(heat_no);
        log::info!(
            "Saved all data for {} race beginning at {} UTC",
            self.venue.name,
            heat.start_time.format("%H:%M")
        );
        Ok(true)
    }
}
