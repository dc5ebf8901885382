//! Ingest and retry commands

use chrono::DateTime;
use chrono_tz::Tz;

use super::{Context, SourceKind};
use crate::client::TelemetryClient;
use crate::config::{CredentialStore, Credentials};
use crate::error::{IngestError, Result};
use crate::sources::{Source, ThingSpeakSource, ZentraSource};
use crate::storage::open_db;
use crate::sync::{parse_datetime_input, IngestEngine, IngestReport, WindowStatus};

/// Ingest a ZENTRA Cloud device over a range
pub async fn zentra(
    ctx: Context,
    device: String,
    from: String,
    to: String,
    api_key: Option<String>,
) -> Result<()> {
    let credentials = load_credentials(api_key, None)?;
    let source = ZentraSource::new(device, credentials.require_zentra()?, ctx.config.zentra.clone());
    let base_url = ctx.config.zentra.base_url.clone();
    run_range(ctx, &base_url, &source, &from, &to).await
}

/// Ingest a ThingSpeak channel over a range
pub async fn thingspeak(
    ctx: Context,
    channel: String,
    from: String,
    to: String,
    api_key: Option<String>,
) -> Result<()> {
    let credentials = load_credentials(None, api_key)?;
    let source = ThingSpeakSource::new(
        channel,
        credentials.require_thingspeak()?,
        ctx.config.timezone,
        ctx.config.thingspeak.clone(),
    );
    let base_url = ctx.config.thingspeak.base_url.clone();
    run_range(ctx, &base_url, &source, &from, &to).await
}

/// Re-ingest windows that failed in earlier runs
pub async fn retry(ctx: Context, kind: SourceKind, id: String, api_key: Option<String>) -> Result<()> {
    match kind {
        SourceKind::Zentra => {
            let credentials = load_credentials(api_key, None)?;
            let source = ZentraSource::new(id, credentials.require_zentra()?, ctx.config.zentra.clone());
            let base_url = ctx.config.zentra.base_url.clone();
            run_retry(ctx, &base_url, &source).await
        }
        SourceKind::Thingspeak => {
            let credentials = load_credentials(None, api_key)?;
            let source = ThingSpeakSource::new(
                id,
                credentials.require_thingspeak()?,
                ctx.config.timezone,
                ctx.config.thingspeak.clone(),
            );
            let base_url = ctx.config.thingspeak.base_url.clone();
            run_retry(ctx, &base_url, &source).await
        }
    }
}

fn load_credentials(zentra: Option<String>, thingspeak: Option<String>) -> Result<Credentials> {
    let stored = CredentialStore::new()?.load()?;
    Ok(stored.with_overrides(zentra, thingspeak))
}

fn engine(ctx: Context, base_url: &str) -> Result<IngestEngine> {
    let client = TelemetryClient::new(base_url, ctx.config.request_timeout())?;
    let db = open_db(&ctx.db_path)?;
    Ok(IngestEngine::new(db, client, ctx.config))
}

async fn run_range<S: Source>(ctx: Context, base_url: &str, source: &S, from: &str, to: &str) -> Result<()> {
    let tz = ctx.config.timezone;
    let start: DateTime<Tz> = parse_datetime_input(from, tz)?;
    let end: DateTime<Tz> = parse_datetime_input(to, tz)?;
    if start > end {
        return Err(IngestError::invalid_param(format!("--from {} is after --to {}", from, to)));
    }

    println!("Using database: {}", ctx.db_path.display());
    let mut engine = engine(ctx, base_url)?;
    let report = engine.ingest(source, start, end).await?;
    print_report(source, &report);
    Ok(())
}

async fn run_retry<S: Source>(ctx: Context, base_url: &str, source: &S) -> Result<()> {
    println!("Using database: {}", ctx.db_path.display());
    let mut engine = engine(ctx, base_url)?;
    let report = engine.retry_failed(source).await?;
    if report.windows.is_empty() {
        println!("No failed windows for {} {}", source.name(), source.source_id());
        return Ok(());
    }
    print_report(source, &report);
    Ok(())
}

fn print_report<S: Source>(source: &S, report: &IngestReport) {
    println!();
    println!("{} {} -> {}", source.name(), source.source_id(), source.table());
    for window in &report.windows {
        let outcome = match &window.status {
            WindowStatus::Ingested(rows) => format!("{} rows", rows),
            WindowStatus::Empty => "no data".to_string(),
            WindowStatus::Failed(reason) => format!("FAILED: {}", reason),
        };
        println!("  {}  {}", window.window, outcome);
    }

    let failed = report.failed().count();
    println!();
    println!(
        "Windows: {}  Rows upserted: {}  Failed: {}",
        report.windows.len(),
        report.rows_written(),
        failed
    );
    if failed > 0 {
        println!(
            "Run 'iot-ingest retry {} {}' to re-ingest failed windows.",
            source.name(),
            source.source_id()
        );
    }
}
