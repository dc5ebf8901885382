use std::time::Duration;

use thiserror::Error;

/// Main error type for iot-ingest
#[derive(Error, Debug)]
pub enum IngestError {
    /// `retry_after` is the provider's Retry-After hint, if it sent one
    #[error("Rate limited{}", retry_after.map(|d| format!(". Retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Schema mismatch on table {table}: missing columns {}", missing.join(", "))]
    SchemaMismatch { table: String, missing: Vec<String> },

    #[error("Column name collision: {column} (from {first} and {second})")]
    ColumnCollision {
        column: String,
        first: String,
        second: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid date format: {0}. Expected YYYY-MM-DD[ HH:MM[:SS]] or RFC 3339")]
    InvalidDateFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Create a malformed payload error from a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid parameter error from a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Whether the error only affects the window it occurred in.
    ///
    /// Configuration and credential problems affect every window, so the
    /// orchestrator stops instead of failing each remaining window the same way.
    pub fn is_window_scoped(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::InvalidParameter(_))
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Render an error for terminal output, with a hint where one helps.
pub fn format_user_error(err: &IngestError) -> String {
    match err {
        IngestError::Config(msg) if msg.contains("API key") => format!(
            "{}\nSet the key in the environment or run 'iot-ingest credentials set'.",
            err
        ),
        IngestError::SchemaMismatch { .. } => format!(
            "{}\nRe-run with schema evolution enabled to add the columns automatically.",
            err
        ),
        _ => err.to_string(),
    }
}
