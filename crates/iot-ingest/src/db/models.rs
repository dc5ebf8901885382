//! Pipeline and storage models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One value reported by a device, as parsed from a provider payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Device serial or channel id
    pub source_id: String,
    pub sensor_name: String,
    /// Empty when the provider has no measurement dimension (ThingSpeak fields)
    pub measurement_name: String,
    /// `None` when the payload value was missing or not numeric
    pub value: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl RawReading {
    pub fn new(
        source_id: impl Into<String>,
        sensor_name: impl Into<String>,
        measurement_name: impl Into<String>,
        value: Option<f64>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            sensor_name: sensor_name.into(),
            measurement_name: measurement_name.into(),
            value,
            observed_at,
        }
    }
}

/// A reading placed on a canonical hour boundary
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedReading {
    /// Canonical hour boundary in the processing timezone
    pub timestamp: DateTime<Tz>,
    /// Instant the value was actually observed
    pub original_at: DateTime<Utc>,
    pub source_id: String,
    pub sensor_name: String,
    pub measurement_name: String,
    pub value: Option<f64>,
}

impl AlignedReading {
    pub fn from_raw(reading: &RawReading, timestamp: DateTime<Tz>) -> Self {
        Self {
            timestamp,
            original_at: reading.observed_at,
            source_id: reading.source_id.clone(),
            sensor_name: reading.sensor_name.clone(),
            measurement_name: reading.measurement_name.clone(),
            value: reading.value,
        }
    }
}

/// One row per canonical timestamp, one entry per column of the batch
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub timestamp: DateTime<Tz>,
    pub values: BTreeMap<String, Option<f64>>,
}

impl WideRow {
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// A bounded time range processed as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl Window {
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Outcome status of one ingestion window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ingested,
    Empty,
    Failed,
    /// A failed window that a later run ingested successfully
    Resolved,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ingested => write!(f, "ingested"),
            RunStatus::Empty => write!(f, "empty"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingested" => Ok(RunStatus::Ingested),
            "empty" => Ok(RunStatus::Empty),
            "failed" => Ok(RunStatus::Failed),
            "resolved" => Ok(RunStatus::Resolved),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Ledger entry for one window of one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub id: Option<i64>,
    pub source: String,
    pub source_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: RunStatus,
    pub rows: i64,
    pub error: Option<String>,
    pub attempted_at: Option<DateTime<Utc>>,
}

/// Row count and time span of one readings table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows: i64,
    pub first: Option<String>,
    pub last: Option<String>,
}
