//! Heat detail records produced by the heat page extractor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vendor-assigned heat number, unique within a venue.
pub type HeatId = u64;

/// Vendor customer id of a racer.
pub type RacerId = u64;

/// Race format printed in the heat's type label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceType {
    Standard,
    Junior,
    Qualifier,
    Practice,
    Final,
    GridRace,
    Drift,
    BallChallenge,
}

/// Scoring rule printed in the heat's "winner by" label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinCondition {
    BestLap,
    Position,
}

/// One recorded lap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapEntry {
    /// Lap time in seconds
    pub lap_time: f64,

    /// Running position as of this lap, not the final one
    pub position: u32,
}

/// A single racer's result inside a heat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacerSession {
    pub name: String,
    pub racer_id: RacerId,
    pub position: u32,
    pub score: i32,

    /// Laps in the order the vendor emitted them
    #[serde(default)]
    pub laps: Vec<LapEntry>,
}

/// Everything a heat detail page says about one heat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatRecord {
    pub heat_id: HeatId,
    pub race_type: RaceType,
    pub win_condition: WinCondition,
    pub start_time: DateTime<Utc>,
    pub track: u32,
    pub sessions: Vec<RacerSession>,
}

impl HeatRecord {
    /// Find the session belonging to `racer_id`.
    pub fn session_for(&self, racer_id: RacerId) -> Option<&RacerSession> {
        self.sessions.iter().find(|s| s.racer_id == racer_id)
    }
}
