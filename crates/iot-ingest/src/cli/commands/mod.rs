pub mod credentials;
pub mod ingest;
pub mod query;
pub mod status;

pub use credentials::{clear as clear_credentials, set as set_credentials, show as show_credentials};
pub use ingest::{retry, thingspeak as ingest_thingspeak, zentra as ingest_zentra};
pub use query::query;
pub use status::status;

use std::path::{Path, PathBuf};

use chrono_tz::Tz;

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::storage::default_db_path;

/// Which provider a command targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    Zentra,
    Thingspeak,
}

impl SourceKind {
    /// Readings table of this provider
    pub fn table<'a>(&self, config: &'a PipelineConfig) -> &'a str {
        match self {
            SourceKind::Zentra => &config.zentra.table,
            SourceKind::Thingspeak => &config.thingspeak.table,
        }
    }
}

/// Settings shared by every command
pub struct Context {
    pub config: PipelineConfig,
    pub db_path: PathBuf,
}

impl Context {
    /// Load the pipeline config and apply global overrides
    pub fn load(config_path: Option<&Path>, db_path: Option<PathBuf>, tz: Option<&str>) -> Result<Self> {
        let mut config = PipelineConfig::load(config_path)?;
        if let Some(name) = tz {
            config.timezone = parse_timezone(name)?;
        }

        Ok(Self {
            config,
            db_path: db_path.unwrap_or_else(default_db_path),
        })
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| IngestError::config(format!("Unknown timezone: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("America/Chicago").unwrap(), chrono_tz::America::Chicago);
        assert!(matches!(parse_timezone("Mars/Olympus"), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_source_tables() {
        let config = PipelineConfig::default();
        assert_eq!(SourceKind::Zentra.table(&config), "SensorReadings");
        assert_eq!(SourceKind::Thingspeak.table(&config), "ThingSpeak");
    }
}
