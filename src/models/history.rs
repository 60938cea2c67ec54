//! Racer history listings and the joined session records built from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::heat::{HeatId, HeatRecord, LapEntry, RaceType, RacerId, WinCondition};

/// One heat a racer took part in, as listed on their history page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Venue display name
    pub venue: String,
    pub heat_id: HeatId,
    pub kart: u32,
    pub time: DateTime<Utc>,
}

/// Parsed content of one venue's racer history page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RacerHistoryPage {
    pub display_name: String,
    pub entries: Vec<HistoryEntry>,
}

/// A racer's history merged across venues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RacerHistory {
    /// Display name from the first venue that answered
    pub name: Option<String>,

    /// Entries keyed by venue key
    pub entries: BTreeMap<String, Vec<HistoryEntry>>,
}

impl RacerHistory {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.entries.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// A history entry joined with the racer's session inside that heat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSessionRecord {
    pub racer_id: RacerId,
    pub heat_id: HeatId,
    pub venue: String,
    pub track: u32,
    pub time: DateTime<Utc>,
    pub race_type: RaceType,
    pub win_condition: WinCondition,
    pub kart: u32,
    pub score: i32,
    pub position: u32,
    pub laps: Vec<LapEntry>,
}

impl FullSessionRecord {
    /// Join `entry` with `racer_id`'s session in `heat`, if the heat has one.
    pub fn join(racer_id: RacerId, entry: &HistoryEntry, heat: &HeatRecord) -> Option<Self> {
        let session = heat.session_for(racer_id)?;
        Some(Self {
            racer_id,
            heat_id: entry.heat_id,
            venue: entry.venue.clone(),
            track: heat.track,
            time: entry.time,
            race_type: heat.race_type,
            win_condition: heat.win_condition,
            kart: entry.kart,
            score: session.score,
            position: session.position,
            laps: session.laps.clone(),
        })
    }
}

/// Everything known about a racer after a backfill fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FullRacerRecord {
    pub racer_id: RacerId,
    pub name: String,
    pub sessions: Vec<FullSessionRecord>,
}
