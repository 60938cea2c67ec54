//! Local filesystem store.
//!
//! Keeps the whole store in memory behind a mutex and writes it through to
//! one JSON document after every change. Writes replace the document
//! atomically (temp file, then rename), and a change is only applied in
//! memory once its write has succeeded.
//!
//! ## Document Layout
//!
//! ```text
//! {
//!   "racers":   [RacerProfile],
//!   "heats":    [HeatRow],
//!   "sessions": [SessionRow]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::RacerId;
use crate::storage::{HeatKey, HeatRow, MAX_STORED_LAPS, RaceStore, RacerProfile, SessionRow};

#[derive(Debug, Clone)]
struct StoredHeat {
    heat: HeatRow,
    sessions: BTreeMap<RacerId, SessionRow>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    racers: BTreeMap<RacerId, RacerProfile>,
    heats: BTreeMap<HeatKey, StoredHeat>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    racers: Vec<RacerProfile>,
    #[serde(default)]
    heats: Vec<HeatRow>,
    #[serde(default)]
    sessions: Vec<SessionRow>,
}

impl StoreState {
    fn from_document(document: StoreDocument) -> Self {
        let mut state = Self::default();
        for racer in document.racers {
            state.insert_racer(&racer);
        }
        for heat in document.heats {
            state.insert_heat(&heat);
        }
        for session in document.sessions {
            if let Err(e) = state.insert_sessions(std::slice::from_ref(&session)) {
                log::warn!("Dropping stored session: {}", e);
            }
        }
        state
    }

    fn to_document(&self) -> StoreDocument {
        StoreDocument {
            racers: self.racers.values().cloned().collect(),
            heats: self.heats.values().map(|h| h.heat.clone()).collect(),
            sessions: self
                .heats
                .values()
                .flat_map(|h| h.sessions.values().cloned())
                .collect(),
        }
    }

    fn insert_racer(&mut self, racer: &RacerProfile) -> bool {
        if self.racers.contains_key(&racer.id) {
            return false;
        }
        self.racers.insert(racer.id, racer.clone());
        true
    }

    fn insert_heat(&mut self, heat: &HeatRow) -> bool {
        let key = heat.key();
        if self.heats.contains_key(&key) {
            return false;
        }
        self.heats.insert(
            key,
            StoredHeat {
                heat: heat.clone(),
                sessions: BTreeMap::new(),
            },
        );
        true
    }

    fn insert_sessions(&mut self, sessions: &[SessionRow]) -> Result<bool> {
        let mut changed = false;
        for session in sessions {
            let key = session.heat_key();
            let stored = self.heats.get_mut(&key).ok_or_else(|| {
                AppError::store(format!(
                    "no heat at {} track {} {} for racer {}",
                    key.venue, key.track, key.time, session.racer_id
                ))
            })?;
            if stored.sessions.contains_key(&session.racer_id) {
                continue;
            }

            let mut row = session.clone();
            if row.laps.len() > MAX_STORED_LAPS {
                log::warn!(
                    "Racer {} ran {} laps at {} {}; keeping the first {}",
                    row.racer_id,
                    row.laps.len(),
                    key.venue,
                    key.time,
                    MAX_STORED_LAPS
                );
                row.laps.truncate(MAX_STORED_LAPS);
            }
            stored.sessions.insert(row.racer_id, row);
            changed = true;
        }
        Ok(changed)
    }
}

/// JSON-file race store.
pub struct LocalStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl LocalStore {
    /// Open the store at `path`, starting empty if the file doesn't exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match read_bytes(&path).await? {
            Some(bytes) => {
                let document: StoreDocument = serde_json::from_slice(&bytes)?;
                StoreState::from_document(document)
            }
            None => {
                log::info!("No store found at {:?}; starting empty", path);
                StoreState::default()
            }
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub async fn heat_count(&self) -> usize {
        self.state.lock().await.heats.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state
            .lock()
            .await
            .heats
            .values()
            .map(|h| h.sessions.len())
            .sum()
    }

    /// Apply `mutate` to a copy of the state, persist it, then swap it in.
    async fn apply<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut StoreState) -> Result<bool> + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if !mutate(&mut next)? {
            return Ok(());
        }
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&next.to_document())?;
            write_bytes(path, &bytes).await?;
        }
        *state = next;
        Ok(())
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read bytes, returning None if file doesn't exist.
async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[async_trait]
impl RaceStore for LocalStore {
    async fn add_racer(&self, racer: &RacerProfile) -> Result<()> {
        self.apply(|state| Ok(state.insert_racer(racer))).await
    }

    async fn add_heat(&self, heat: &HeatRow) -> Result<()> {
        self.apply(|state| Ok(state.insert_heat(heat))).await
    }

    async fn add_heats(&self, heats: &[HeatRow]) -> Result<()> {
        self.apply(|state| {
            let mut changed = false;
            for heat in heats {
                changed |= state.insert_heat(heat);
            }
            Ok(changed)
        })
        .await
    }

    async fn add_sessions(&self, sessions: &[SessionRow]) -> Result<()> {
        self.apply(|state| state.insert_sessions(sessions)).await
    }

    async fn record_heat(&self, heat: &HeatRow, sessions: &[SessionRow]) -> Result<()> {
        let key = heat.key();
        if let Some(stray) = sessions.iter().find(|s| s.heat_key() != key) {
            return Err(AppError::store(format!(
                "session for racer {} does not belong to heat {}",
                stray.racer_id, heat.heat_id
            )));
        }

        self.apply(|state| {
            let added = state.insert_heat(heat);
            let sessions_added = state.insert_sessions(sessions)?;
            Ok(added || sessions_added)
        })
        .await
    }

    async fn racer(&self, id: RacerId) -> Result<Option<RacerProfile>> {
        Ok(self.state.lock().await.racers.get(&id).cloned())
    }

    async fn heat(&self, key: &HeatKey) -> Result<Option<HeatRow>> {
        Ok(self.state.lock().await.heats.get(key).map(|h| h.heat.clone()))
    }

    async fn sessions(&self, key: &HeatKey) -> Result<Vec<SessionRow>> {
        Ok(self
            .state
            .lock()
            .await
            .heats
            .get(key)
            .map(|h| h.sessions.values().cloned().collect())
            .unwrap_or_default())
    }
}
