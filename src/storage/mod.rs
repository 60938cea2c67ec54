//! Storage abstractions for racer, heat and session persistence.
//!
//! Rows are keyed the way the timing data is naturally unique:
//!
//! ```text
//! racers    racer_id
//! heats     (venue, track, time)
//! sessions  (venue, track, time, racer_id)
//! ```
//!
//! Every insert is insert-or-ignore, so replaying a heat is harmless.

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{FullSessionRecord, HeatId, HeatRecord, LapEntry, RaceType, RacerId, WinCondition};

// Re-export for convenience
pub use local::LocalStore;

/// Laps kept per stored session; extras are dropped with a warning.
pub const MAX_STORED_LAPS: usize = 50;

/// A racer known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RacerProfile {
    pub id: RacerId,
    pub name: String,
    /// Flagged as a fast racer worth comparing against
    #[serde(default)]
    pub is_fast: bool,
    /// Followed by the operator
    #[serde(default)]
    pub follow: bool,
}

impl RacerProfile {
    pub fn new(id: RacerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_fast: false,
            follow: false,
        }
    }
}

/// Natural key of a heat.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeatKey {
    pub venue: String,
    pub track: u32,
    pub time: DateTime<Utc>,
}

impl HeatKey {
    pub fn new(venue: impl Into<String>, track: u32, time: DateTime<Utc>) -> Self {
        Self {
            venue: venue.into(),
            track,
            time,
        }
    }
}

/// A stored heat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatRow {
    pub venue: String,
    pub track: u32,
    pub time: DateTime<Utc>,
    pub race_type: RaceType,
    pub win_condition: WinCondition,
    /// Vendor heat number
    pub heat_id: HeatId,
}

impl HeatRow {
    /// Row for a heat detail record run at `venue`.
    pub fn from_heat(venue: impl Into<String>, heat: &HeatRecord) -> Self {
        Self {
            venue: venue.into(),
            track: heat.track,
            time: heat.start_time,
            race_type: heat.race_type,
            win_condition: heat.win_condition,
            heat_id: heat.heat_id,
        }
    }

    pub fn key(&self) -> HeatKey {
        HeatKey::new(self.venue.clone(), self.track, self.time)
    }
}

impl From<&FullSessionRecord> for HeatRow {
    fn from(record: &FullSessionRecord) -> Self {
        Self {
            venue: record.venue.clone(),
            track: record.track,
            time: record.time,
            race_type: record.race_type,
            win_condition: record.win_condition,
            heat_id: record.heat_id,
        }
    }
}

/// One racer's stored result in one heat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub venue: String,
    pub track: u32,
    pub time: DateTime<Utc>,
    pub racer_id: RacerId,
    pub position: u32,
    pub kart: u32,
    pub score: i32,
    pub laps: Vec<LapEntry>,
}

impl SessionRow {
    pub fn heat_key(&self) -> HeatKey {
        HeatKey::new(self.venue.clone(), self.track, self.time)
    }
}

impl From<&FullSessionRecord> for SessionRow {
    fn from(record: &FullSessionRecord) -> Self {
        Self {
            venue: record.venue.clone(),
            track: record.track,
            time: record.time,
            racer_id: record.racer_id,
            position: record.position,
            kart: record.kart,
            score: record.score,
            laps: record.laps.clone(),
        }
    }
}

/// Trait for race data storage backends.
#[async_trait]
pub trait RaceStore: Send + Sync {
    /// Register a racer; an existing id is left untouched.
    async fn add_racer(&self, racer: &RacerProfile) -> Result<()>;

    /// Insert a heat; an existing `(venue, track, time)` is left untouched.
    async fn add_heat(&self, heat: &HeatRow) -> Result<()>;

    /// Insert many heats in one write.
    async fn add_heats(&self, heats: &[HeatRow]) -> Result<()> {
        for heat in heats {
            self.add_heat(heat).await?;
        }
        Ok(())
    }

    /// Insert sessions; each must reference a stored heat.
    async fn add_sessions(&self, sessions: &[SessionRow]) -> Result<()>;

    /// Insert a heat and its sessions as one unit: all of it or none of it.
    async fn record_heat(&self, heat: &HeatRow, sessions: &[SessionRow]) -> Result<()>;

    async fn racer(&self, id: RacerId) -> Result<Option<RacerProfile>>;

    async fn heat(&self, key: &HeatKey) -> Result<Option<HeatRow>>;

    /// Sessions of one heat, ordered by racer id.
    async fn sessions(&self, key: &HeatKey) -> Result<Vec<SessionRow>>;
}
