// src/models/mod.rs

//! Domain models for the ingestion engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod heat;
mod history;
mod venue;

// Re-export all public types
pub use config::{Config, FetchConfig, StorageConfig, WatcherConfig};
pub use heat::{HeatId, HeatRecord, LapEntry, RaceType, RacerId, RacerSession, WinCondition};
pub use history::{FullRacerRecord, FullSessionRecord, HistoryEntry, RacerHistory, RacerHistoryPage};
pub use venue::{Venue, VenueRegistry, canonical_key};
