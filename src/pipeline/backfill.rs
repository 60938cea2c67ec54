// src/pipeline/backfill.rs

//! One-shot racer backfill.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::Result;
use crate::models::RacerId;
use crate::services::RacerDataAssembler;
use crate::storage::{HeatRow, RaceStore, RacerProfile, SessionRow};

/// What to backfill and how to flag the racer.
#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub racer_id: RacerId,
    pub since: DateTime<Utc>,
    pub is_fast: bool,
    pub follow: bool,
}

impl BackfillRequest {
    pub fn new(racer_id: RacerId) -> Self {
        Self {
            racer_id,
            since: default_since(Utc::now()),
            is_fast: false,
            follow: false,
        }
    }
}

/// Outcome of a backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub racer_id: RacerId,
    /// `None` when no venue knew the racer
    pub name: Option<String>,
    pub heats: usize,
    pub sessions: usize,
}

/// January 1st of the year before `now`, UTC.
pub fn default_since(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year() - 1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Fetch a racer's history and write the racer, their heats and their
/// sessions to `store`.
pub async fn run_backfill(
    request: &BackfillRequest,
    assembler: &RacerDataAssembler,
    store: &dyn RaceStore,
) -> Result<BackfillSummary> {
    log::info!(
        "Backfilling racer {} since {}",
        request.racer_id,
        request.since.format("%Y-%m-%d")
    );

    let Some(record) = assembler
        .get_racer_data(request.racer_id, request.since)
        .await?
    else {
        log::warn!("Racer {} not found at any venue", request.racer_id);
        return Ok(BackfillSummary {
            racer_id: request.racer_id,
            name: None,
            heats: 0,
            sessions: 0,
        });
    };

    let profile = RacerProfile {
        id: record.racer_id,
        name: record.name.clone(),
        is_fast: request.is_fast,
        follow: request.follow,
    };
    store.add_racer(&profile).await?;

    let heats: BTreeMap<_, HeatRow> = record
        .sessions
        .iter()
        .map(HeatRow::from)
        .map(|heat| (heat.key(), heat))
        .collect();
    let sessions: Vec<SessionRow> = record.sessions.iter().map(SessionRow::from).collect();

    let heats: Vec<HeatRow> = heats.into_values().collect();
    store.add_heats(&heats).await?;
    store.add_sessions(&sessions).await?;

    log::info!(
        "Saved {} ({}): {} heats, {} sessions",
        record.name,
        record.racer_id,
        heats.len(),
        sessions.len()
    );

    Ok(BackfillSummary {
        racer_id: record.racer_id,
        name: Some(record.name),
        heats: heats.len(),
        sessions: sessions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_since_is_start_of_last_year() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        assert_eq!(default_since(now), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_request_defaults() {
        let request = BackfillRequest::new(7);
        assert!(!request.is_fast && !request.follow);
        assert!(request.since < Utc::now());
    }
}
