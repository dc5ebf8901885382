//! Storage layer for aligned readings
//!
//! A single SQLite database holds one wide table per source plus the
//! ingestion run ledger.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/iot-ingest/
//! └── readings.db
//!     ├── SensorReadings      # ZENTRA devices, one column per sensor/measurement
//!     ├── ThingSpeak          # ThingSpeak channels, one column per mapped field
//!     └── ingest_runs         # Outcome of every processed window
//! ```
//!
//! Every reading table is keyed by a unique UTC `timestamp`, so re-ingesting a
//! range updates rows in place instead of duplicating them.

mod readings_db;

pub use readings_db::{
    timestamp_key, ColumnTable, ConflictPolicy, QueryOutcome, ReadingsDb, UpsertOptions,
    QUERY_TIMESTAMP_FORMAT, STORED_TIMESTAMP_FORMAT,
};

use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Get the default storage path
pub fn default_storage_path() -> PathBuf {
    crate::config::data_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Get the default readings database path
pub fn default_db_path() -> PathBuf {
    default_storage_path().join("readings.db")
}

/// Open the readings database, creating its parent directory if needed
pub fn open_db(path: &Path) -> Result<ReadingsDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            IngestError::Database(format!("Failed to create storage directory: {}", e))
        })?;
    }
    ReadingsDb::open(path)
}
