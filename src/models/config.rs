//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Venue, VenueRegistry};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and fan-out behavior settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Live scoreboard watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Race store location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Venue definitions
    #[serde(default = "defaults::default_venues")]
    pub venues: Vec<Venue>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_in_flight == 0 {
            return Err(AppError::validation("fetch.max_in_flight must be > 0"));
        }
        if self.watcher.poll_interval_secs == 0 {
            return Err(AppError::validation("watcher.poll_interval_secs must be > 0"));
        }
        if self.watcher.subscription_group.trim().is_empty() {
            return Err(AppError::validation("watcher.subscription_group is empty"));
        }
        if self.venues.is_empty() {
            return Err(AppError::validation("No venues defined"));
        }

        let mut seen = HashSet::new();
        for venue in &self.venues {
            if venue.tracks == 0 {
                return Err(AppError::validation(format!(
                    "venue '{}' must have at least one track",
                    venue.name
                )));
            }
            if !seen.insert(venue.key()) {
                return Err(AppError::validation(format!(
                    "venue '{}' is defined twice",
                    venue.name
                )));
            }
            url::Url::parse(&self.fetch.base_url(&venue.subdomain))?;
        }
        Ok(())
    }

    /// Build the venue registry from the configured venues.
    pub fn registry(&self) -> Result<VenueRegistry> {
        VenueRegistry::new(self.venues.iter().cloned())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            watcher: WatcherConfig::default(),
            storage: StorageConfig::default(),
            venues: defaults::default_venues(),
        }
    }
}

/// HTTP client and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum page fetches in flight at once
    #[serde(default = "defaults::max_in_flight")]
    pub max_in_flight: usize,

    /// Scheme used for vendor URLs
    #[serde(default = "defaults::scheme")]
    pub scheme: String,

    /// Vendor domain that venue subdomains hang off
    #[serde(default = "defaults::vendor_domain")]
    pub vendor_domain: String,
}

impl FetchConfig {
    /// Base URL for a venue subdomain, without a trailing slash.
    pub fn base_url(&self, subdomain: &str) -> String {
        format!("{}://{}.{}", self.scheme, subdomain, self.vendor_domain)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_in_flight: defaults::max_in_flight(),
            scheme: defaults::scheme(),
            vendor_domain: defaults::vendor_domain(),
        }
    }
}

/// Live watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Fixed sleep between long-poll requests
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    /// Scoreboard hub group to subscribe to
    #[serde(default = "defaults::subscription_group")]
    pub subscription_group: String,

    /// Cursor sent on the first poll
    #[serde(default = "defaults::initial_message_id")]
    pub initial_message_id: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval(),
            subscription_group: defaults::subscription_group(),
            initial_message_id: defaults::initial_message_id(),
        }
    }
}

/// Race store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding racers, heats and sessions
    #[serde(default = "defaults::store_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::store_path(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::Venue;

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; heatwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_in_flight() -> usize {
        10
    }
    pub fn scheme() -> String {
        "https".into()
    }
    pub fn vendor_domain() -> String {
        "clubspeedtiming.com".into()
    }

    // Watcher defaults
    pub fn poll_interval() -> u64 {
        10
    }
    pub fn subscription_group() -> String {
        "SP_Center.ScoreBoardHub.1".into()
    }
    pub fn initial_message_id() -> String {
        "1".into()
    }

    // Storage defaults
    pub fn store_path() -> PathBuf {
        PathBuf::from("data/races.json")
    }

    // Venue defaults
    pub fn default_venues() -> Vec<Venue> {
        vec![Venue::new(
            "Atlanta",
            "k1atlanta",
            1,
            chrono_tz::US::Eastern,
        )]
    }
}
