//! Venue definitions and the registry used to resolve them.

use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A physical racing location with its own timing subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Display name (e.g., "Atlanta")
    pub name: String,

    /// Timing vendor subdomain (e.g., "k1atlanta")
    pub subdomain: String,

    /// Number of tracks run at the venue
    #[serde(default = "default_tracks")]
    pub tracks: u32,

    /// Local timezone the vendor prints timestamps in
    pub timezone: Tz,
}

fn default_tracks() -> u32 {
    1
}

impl Venue {
    pub fn new(name: impl Into<String>, subdomain: impl Into<String>, tracks: u32, timezone: Tz) -> Self {
        Self {
            name: name.into(),
            subdomain: subdomain.into(),
            tracks,
            timezone,
        }
    }

    /// Canonical lookup key for this venue.
    pub fn key(&self) -> String {
        canonical_key(&self.name)
    }
}

/// Lower-cases a display string and replaces spaces with underscores.
pub fn canonical_key(display: &str) -> String {
    display.trim().replace(' ', "_").to_lowercase()
}

/// Static venue configuration, injected into every component.
#[derive(Debug, Clone, Default)]
pub struct VenueRegistry {
    venues: BTreeMap<String, Venue>,
}

impl VenueRegistry {
    /// Build a registry; duplicate keys are a configuration error.
    pub fn new(venues: impl IntoIterator<Item = Venue>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for venue in venues {
            let key = venue.key();
            if map.insert(key.clone(), venue).is_some() {
                return Err(AppError::config(format!("duplicate venue key '{key}'")));
            }
        }
        Ok(Self { venues: map })
    }

    /// Resolve a display string such as "Atlanta" or "north atlanta".
    pub fn resolve(&self, display: &str) -> Result<&Venue> {
        self.venues
            .get(&canonical_key(display))
            .ok_or_else(|| AppError::LocationNotRecognized(display.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&Venue> {
        self.venues.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Venue> {
        self.venues.values()
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}
