//! Pipeline configuration
//!
//! Every field has a default, so a partial `config.json` only needs the values
//! it changes:
//!
//! ```json
//! { "timezone": "UTC", "segment_days": 3, "thingspeak": { "calibration": {} } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::storage::ConflictPolicy;
use crate::transform::AlignMode;

const CONFIG_FILENAME: &str = "config.json";

/// Settings shared by every stage of an ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timezone of the hour grid and of naive date-time inputs
    pub timezone: Tz,

    /// Length of one ingestion window in days
    pub segment_days: u32,

    /// Pause between consecutive windows in milliseconds
    pub segment_delay_ms: u64,

    /// Wait after an HTTP 429 before retrying the same page
    pub rate_limit_cooldown_secs: u64,

    /// Consecutive 429s on one page before the window is given up
    pub max_rate_limit_retries: u32,

    /// Minimum spacing between two requests in milliseconds
    pub request_spacing_ms: u64,

    pub request_timeout_secs: u64,

    /// Joins sensor and measurement names into a column name
    pub column_separator: String,

    pub conflict_policy: ConflictPolicy,

    /// Add missing value columns instead of failing the batch
    pub schema_evolution: bool,

    pub zentra: ZentraConfig,
    pub thingspeak: ThingSpeakConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Chicago,
            segment_days: 7,
            segment_delay_ms: 1000,
            rate_limit_cooldown_secs: 60,
            max_rate_limit_retries: 10,
            request_spacing_ms: 0,
            request_timeout_secs: 30,
            column_separator: " - ".to_string(),
            conflict_policy: ConflictPolicy::Merge,
            schema_evolution: true,
            zentra: ZentraConfig::default(),
            thingspeak: ThingSpeakConfig::default(),
        }
    }
}

/// ZENTRA Cloud logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZentraConfig {
    pub base_url: String,
    pub page_size: u32,
    pub table: String,
    pub alignment: AlignMode,
    /// Additive offset per sensor name
    pub calibration: BTreeMap<String, f64>,
}

impl Default for ZentraConfig {
    fn default() -> Self {
        Self {
            base_url: "https://zentracloud.com".to_string(),
            page_size: 2000,
            table: "SensorReadings".to_string(),
            alignment: AlignMode::Nearest,
            calibration: BTreeMap::new(),
        }
    }
}

/// ThingSpeak channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingSpeakConfig {
    pub base_url: String,
    /// Maximum results ThingSpeak returns for one request
    pub results: u32,
    pub table: String,
    pub alignment: AlignMode,
    /// Additive offset per sensor name
    pub calibration: BTreeMap<String, f64>,
    /// Feed field (`field1`..`field8`) to sensor name
    pub fields: BTreeMap<String, String>,
}

impl Default for ThingSpeakConfig {
    fn default() -> Self {
        let mut calibration = BTreeMap::new();
        // Mounting offset of the tilt sensor on the deployed channel
        calibration.insert("Pitch".to_string(), 8.22);

        let mut fields = BTreeMap::new();
        fields.insert("field1".to_string(), "Pitch".to_string());
        fields.insert("field2".to_string(), "Roll".to_string());

        Self {
            base_url: "https://api.thingspeak.com".to_string(),
            results: 8000,
            table: "ThingSpeak".to_string(),
            alignment: AlignMode::Nearest,
            calibration,
            fields,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an explicit path, or from the config directory.
    ///
    /// An explicit path must exist; the default location falls back to
    /// built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(IngestError::config(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => {
                let default_path = super::config_dir()?.join(CONFIG_FILENAME);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let json = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            IngestError::config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.segment_days == 0 {
            return Err(IngestError::config("segment_days must be at least 1"));
        }
        if self.zentra.page_size == 0 || self.thingspeak.results == 0 {
            return Err(IngestError::config("page sizes must be at least 1"));
        }
        if self.column_separator.is_empty() {
            return Err(IngestError::config("column_separator must not be empty"));
        }
        Ok(())
    }

    pub fn segment_length(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.segment_days))
    }

    pub fn segment_delay(&self) -> Duration {
        Duration::from_millis(self.segment_delay_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
