// src/error.rs

//! Unified error handling for the ingestion engine.

use std::fmt;

use thiserror::Error;

use crate::extract::ParseError;

/// Result type alias for heatwatch operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a status was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Vendor answered with a non-2xx status
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Vendor answered 200 but the body is its generic error page
    #[error("vendor could not provide a valid response for {url}")]
    VendorServerError { url: String },

    /// Page markup did not match the expected grammar
    #[error("failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    /// Venue key could not be resolved against the registry
    #[error("Location not recognized: {0}")]
    LocationNotRecognized(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence layer rejected a write
    #[error("Store error: {0}")]
    Store(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a parse error bound to the page it came from.
    pub fn parse(url: impl Into<String>, source: ParseError) -> Self {
        Self::Parse {
            url: url.into(),
            source,
        }
    }

    /// Whether the failure is a vendor-side transient rather than a format change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Status { .. } | Self::VendorServerError { .. } | Self::Http(_)
        )
    }
}
