//! Error types for the loop_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for loop_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No glucose history was supplied, so there is nothing to forecast from
    #[error("Missing glucose: glucose history is empty")]
    MissingGlucose,

    /// Therapy schedules do not cover the time span the dose history needs
    #[error("Incomplete schedules: {0}")]
    IncompleteSchedules(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
