//! Pipeline settings and provider API keys
//!
//! `config.json` is read from the per-user config directory and stored keys
//! live in the per-user data directory. `IOT_INGEST_HOME` replaces both.

mod credentials;
mod pipeline;

pub use credentials::{CredentialStore, Credentials};
pub use pipeline::{PipelineConfig, ThingSpeakConfig, ZentraConfig};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Directory name under the platform config and data directories
const APP_DIR: &str = "iot-ingest";

/// Overrides both the config and the data directory
pub const HOME_ENV: &str = "IOT_INGEST_HOME";

/// Directory holding `config.json`
pub fn config_dir() -> Result<PathBuf> {
    resolve_dir(std::env::var_os(HOME_ENV), dirs::config_dir(), "config")
}

/// Directory holding stored credentials and the default readings database
pub fn data_dir() -> Result<PathBuf> {
    resolve_dir(std::env::var_os(HOME_ENV), dirs::data_dir(), "data")
}

fn resolve_dir(home: Option<OsString>, platform: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    if let Some(home) = home.filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    platform.map(|p| p.join(APP_DIR)).ok_or_else(|| {
        IngestError::config(format!(
            "No {} directory on this platform; set {}",
            kind, HOME_ENV
        ))
    })
}

/// Create `path` and its parents
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        IngestError::config(format!("Cannot create {}: {}", path.display(), e))
    })
}
