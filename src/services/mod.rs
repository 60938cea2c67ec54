//! Service layer for the ingestion engine.
//!
//! This module contains the business logic for:
//! - Bounded page fetching (`FetchOrchestrator`)
//! - Racer backfill assembly (`RacerDataAssembler`)
//! - Live scoreboard watching (`LiveRaceWatcher`)

pub mod fetch;
mod racer;
pub mod watcher;

pub use fetch::{FetchOrchestrator, VenueSelection};
pub use racer::RacerDataAssembler;
pub use watcher::{LiveRaceWatcher, WatchPhase};
