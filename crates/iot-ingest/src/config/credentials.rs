use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CREDENTIALS_FILENAME: &str = "credentials.json";

/// API keys for the telemetry providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zentra_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thingspeak_api_key: Option<String>,
}

impl Credentials {
    /// Overlay keys given on the command line or in the environment
    pub fn with_overrides(mut self, zentra: Option<String>, thingspeak: Option<String>) -> Self {
        if zentra.is_some() {
            self.zentra_api_key = zentra;
        }
        if thingspeak.is_some() {
            self.thingspeak_api_key = thingspeak;
        }
        self
    }

    pub fn require_zentra(&self) -> Result<&str> {
        self.zentra_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| IngestError::config("ZENTRA API key is not configured"))
    }

    pub fn require_thingspeak(&self) -> Result<&str> {
        self.thingspeak_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| IngestError::config("ThingSpeak API key is not configured"))
    }
}

/// File-based storage for provider API keys
pub struct CredentialStore {
    base_dir: PathBuf,
}

impl CredentialStore {
    /// Create a credential store in the default data directory
    pub fn new() -> Result<Self> {
        let base_dir = super::data_dir()?;
        super::ensure_dir(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create a credential store with a custom base directory (for testing)
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        super::ensure_dir(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path(&self) -> PathBuf {
        self.base_dir.join(CREDENTIALS_FILENAME)
    }

    /// Save credentials, readable by the owner only
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let path = self.path();
        let json = serde_json::to_string_pretty(credentials)?;
        fs::write(&path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load stored credentials; an absent file yields empty credentials
    pub fn load(&self) -> Result<Credentials> {
        let path = self.path();
        if !path.exists() {
            return Ok(Credentials::default());
        }

        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn has_credentials(&self) -> bool {
        self.path().exists()
    }

    /// Remove the stored credentials file
    pub fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> CredentialStore {
        CredentialStore::with_dir(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let creds = Credentials {
            zentra_api_key: Some("zkey".to_string()),
            thingspeak_api_key: None,
        };
        store.save(&creds).unwrap();

        assert!(store.has_credentials());
        assert_eq!(store.load().unwrap(), creds);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.save(&Credentials::default()).unwrap();

        let mode = fs::metadata(temp.path().join(CREDENTIALS_FILENAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let loaded = store(&temp).load().unwrap();
        assert_eq!(loaded, Credentials::default());
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.save(&Credentials::default()).unwrap();
        store.clear().unwrap();
        assert!(!store.has_credentials());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let stored = Credentials {
            zentra_api_key: Some("stored".to_string()),
            thingspeak_api_key: Some("stored-ts".to_string()),
        };
        let creds = stored.with_overrides(Some("env".to_string()), None);
        assert_eq!(creds.require_zentra().unwrap(), "env");
        assert_eq!(creds.require_thingspeak().unwrap(), "stored-ts");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let creds = Credentials {
            zentra_api_key: Some(String::new()),
            thingspeak_api_key: None,
        };
        assert!(matches!(creds.require_zentra(), Err(IngestError::Config(_))));
        assert!(matches!(
            creds.require_thingspeak(),
            Err(IngestError::Config(_))
        ));
    }
}
