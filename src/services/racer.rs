// src/services/racer.rs

//! Racer backfill assembly.
//!
//! Joins a racer's cross-venue history with the heat detail pages it points
//! at, producing one record per heat the racer can be found in.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::error::Result;
use crate::models::{FullRacerRecord, FullSessionRecord, HeatId, RacerId};
use crate::services::fetch::{FetchOrchestrator, VenueSelection};

/// Builds full racer records on top of a [`FetchOrchestrator`].
pub struct RacerDataAssembler {
    orchestrator: Arc<FetchOrchestrator>,
}

impl RacerDataAssembler {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Fetch everything known about `racer_id` since `since`.
    ///
    /// Returns `None` when no venue produced a history page. Heats that fail
    /// to fetch, or that don't list the racer, are left out of the result.
    pub async fn get_racer_data(
        &self,
        racer_id: RacerId,
        since: DateTime<Utc>,
    ) -> Result<Option<FullRacerRecord>> {
        let history = self
            .orchestrator
            .get_racer_history(racer_id, since, VenueSelection::All)
            .await?;
        if history.is_empty() {
            log::warn!("No history found for racer {}", racer_id);
            return Ok(None);
        }

        let registry = self.orchestrator.registry();
        let batches = history.entries.iter().filter_map(|(key, entries)| {
            let venue = registry.get(key)?;
            let heat_ids: Vec<HeatId> = entries.iter().map(|e| e.heat_id).collect();
            Some(async move {
                let heats = self.orchestrator.get_heat_info(venue, &heat_ids).await;
                (key, heats)
            })
        });
        let heats_by_venue: HashMap<&String, _> = join_all(batches).await.into_iter().collect();

        let mut sessions = Vec::with_capacity(history.entry_count());
        let mut missing = 0;
        for (key, entries) in &history.entries {
            let Some(heats) = heats_by_venue.get(key) else { continue };
            for entry in entries {
                let joined = heats
                    .get(&entry.heat_id)
                    .and_then(|heat| FullSessionRecord::join(racer_id, entry, heat));
                match joined {
                    Some(record) => sessions.push(record),
                    None => missing += 1,
                }
            }
        }

        if missing > 0 {
            log::warn!(
                "Racer {}: {} of {} history entries could not be joined",
                racer_id,
                missing,
                history.entry_count()
            );
        }
        log::info!("Racer {}: assembled {} sessions", racer_id, sessions.len());

        Ok(Some(FullRacerRecord {
            racer_id,
            name: history.name.unwrap_or_default(),
            sessions,
        }))
    }
}
