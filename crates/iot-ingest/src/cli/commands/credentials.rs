//! API key management commands

use std::io::{self, Write};

use crate::config::{CredentialStore, Credentials};
use crate::error::{IngestError, Result};

/// Store API keys, prompting for the ones not given as arguments
pub async fn set(zentra: Option<String>, thingspeak: Option<String>) -> Result<()> {
    let store = CredentialStore::new()?;
    let current = store.load()?;

    let (zentra, thingspeak) = if zentra.is_none() && thingspeak.is_none() {
        (
            prompt("ZENTRA Cloud API key (blank to keep): ")?,
            prompt("ThingSpeak read API key (blank to keep): ")?,
        )
    } else {
        (zentra, thingspeak)
    };

    if zentra.is_none() && thingspeak.is_none() {
        return Err(IngestError::invalid_param("no API key given"));
    }

    let updated = current.with_overrides(zentra, thingspeak);
    store.save(&updated)?;

    println!("Credentials saved.");
    print_keys(&updated);
    Ok(())
}

/// Show which API keys are stored, masked
pub async fn show() -> Result<()> {
    let store = CredentialStore::new()?;

    if !store.has_credentials() {
        println!("No stored credentials.");
        println!("Run 'iot-ingest credentials set' or set ZENTRA_API_KEY / THINGSPEAK_API_KEY.");
        return Ok(());
    }

    print_keys(&store.load()?);
    Ok(())
}

/// Remove stored API keys
pub async fn clear() -> Result<()> {
    let store = CredentialStore::new()?;

    if !store.has_credentials() {
        println!("No stored credentials.");
        return Ok(());
    }

    store.clear()?;
    println!("Credentials removed.");
    Ok(())
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    Ok((!input.is_empty()).then(|| input.to_string()))
}

fn print_keys(credentials: &Credentials) {
    println!("  ZENTRA:     {}", mask(credentials.zentra_api_key.as_deref()));
    println!("  ThingSpeak: {}", mask(credentials.thingspeak_api_key.as_deref()));
}

/// Show only the last four characters of a key
fn mask(key: Option<&str>) -> String {
    match key {
        Some(k) if !k.is_empty() => {
            let chars: Vec<char> = k.chars().collect();
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            format!("****{}", tail)
        }
        _ => "(not set)".to_string(),
    }
}
